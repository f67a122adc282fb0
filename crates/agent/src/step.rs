use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use brandkit_core::DomainError;

/// Stage of the brand creation wizard. Each step is one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardStep {
    SocialAnalysis,
    BrandIdentity,
    Customization,
    LogoGeneration,
    LogoRefinement,
    MockupGeneration,
    BrandGuide,
    Completion,
}

/// Instruction used for step names the wizard does not know.
pub const GENERIC_INSTRUCTION: &str = "Process the user's input for this step of the brand wizard. \
     Use the available tools as needed and save any results with saveBrandData.";

impl WizardStep {
    pub const ALL: [WizardStep; 8] = [
        WizardStep::SocialAnalysis,
        WizardStep::BrandIdentity,
        WizardStep::Customization,
        WizardStep::LogoGeneration,
        WizardStep::LogoRefinement,
        WizardStep::MockupGeneration,
        WizardStep::BrandGuide,
        WizardStep::Completion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WizardStep::SocialAnalysis => "social-analysis",
            WizardStep::BrandIdentity => "brand-identity",
            WizardStep::Customization => "customization",
            WizardStep::LogoGeneration => "logo-generation",
            WizardStep::LogoRefinement => "logo-refinement",
            WizardStep::MockupGeneration => "mockup-generation",
            WizardStep::BrandGuide => "brand-guide",
            WizardStep::Completion => "completion",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            WizardStep::SocialAnalysis => {
                "Analyze the user's social media profiles. Scrape each profile with \
                 scrapeSocialProfile, then summarize audience, tone, visual style and recurring themes."
            }
            WizardStep::BrandIdentity => {
                "Derive a brand identity from the analysis so far: mission, values, personality, \
                 target audience and voice. Use analyzeBrand and save the result."
            }
            WizardStep::Customization => {
                "Apply the user's customization choices (colors, typography, style preferences) \
                 to the brand identity and save the updated brand data."
            }
            WizardStep::LogoGeneration => {
                "Check logo credits with checkCredits, then generate logo concepts with \
                 generateLogo that fit the brand identity."
            }
            WizardStep::LogoRefinement => {
                "Refine the selected logo according to the user's feedback. Check credits before \
                 generating a new variation."
            }
            WizardStep::MockupGeneration => {
                "Check mockup credits with checkCredits, then place the chosen logo on product \
                 mockups with generateMockup."
            }
            WizardStep::BrandGuide => {
                "Assemble a brand guide from the saved identity, palette, typography and logo \
                 usage rules."
            }
            WizardStep::Completion => {
                "Summarize the finished brand and confirm every asset has been saved with saveBrandData."
            }
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WizardStep {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WizardStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| DomainError::unknown("wizard step", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_agree() {
        for step in WizardStep::ALL {
            assert_eq!(step.as_str().parse::<WizardStep>().unwrap(), step);
            assert_eq!(
                serde_json::to_value(step).unwrap(),
                serde_json::Value::String(step.to_string())
            );
        }
    }

    #[test]
    fn unknown_step_is_rejected() {
        assert!("logo_generation".parse::<WizardStep>().is_err());
    }
}
