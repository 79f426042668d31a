use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::model::{auth::Rights, mongodb::Id};

type HmacSha256 = Hmac<Sha256>;

/// A signed identity assertion from the sign-on subsystem: the subject it
/// vouches for, the rights granted, and an HMAC over both under the
/// secret shared with that subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityAssertion {
    pub subject: Id,
    pub rights: Rights,
    pub signature: String,
}

impl IdentityAssertion {
    /// Sign an assertion; also used by the test harness to log in.
    pub fn sign(subject: Id, rights: Rights, config: &Config) -> Self {
        let signature = Self::expected_signature(subject, rights, config);
        Self {
            subject,
            rights,
            signature,
        }
    }

    /// Verify the signature against the shared secret, in constant time.
    pub fn verify(&self, config: &Config) -> bool {
        let mut mac = HmacSha256::new_from_slice(config.sso_secret())
            .expect("HMAC accepts any key length");
        mac.update(&self.subject.to_bytes());
        mac.update(&[self.rights as u8]);
        let Ok(raw) = data_encoding::HEXLOWER.decode(self.signature.as_bytes()) else {
            return false;
        };
        mac.verify_slice(&raw).is_ok()
    }

    fn expected_signature(subject: Id, rights: Rights, config: &Config) -> String {
        let mut mac = HmacSha256::new_from_slice(config.sso_secret())
            .expect("HMAC accepts any key length");
        mac.update(&subject.to_bytes());
        mac.update(&[rights as u8]);
        data_encoding::HEXLOWER.encode(&mac.finalize().into_bytes())
    }
}
