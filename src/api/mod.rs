use rocket::Route;

pub mod admin;
pub mod auth;
mod common;
pub mod departmental;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod ssg;
pub mod tally;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(ssg::routes());
    routes.extend(departmental::routes());
    routes.extend(admin::routes());
    routes.extend(tally::routes());
    routes
}
