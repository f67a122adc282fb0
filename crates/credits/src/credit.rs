use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use brandkit_core::DomainError;

/// Kind of metered allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditType {
    Logo,
    Mockup,
    Video,
}

impl CreditType {
    pub const ALL: [CreditType; 3] = [CreditType::Logo, CreditType::Mockup, CreditType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditType::Logo => "logo",
            CreditType::Mockup => "mockup",
            CreditType::Video => "video",
        }
    }
}

impl fmt::Display for CreditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logo" => Ok(CreditType::Logo),
            "mockup" => Ok(CreditType::Mockup),
            "video" => Ok(CreditType::Video),
            _ => Err(DomainError::unknown("credit type", s)),
        }
    }
}
