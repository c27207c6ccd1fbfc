//! Intermediate representation of a compiled Journey
//!
//! A Journey compiles to an ordered list of [`IrStep`]s, each holding an ordered list of
//! [`Instruction`]s. `Instruction` is a closed set: every variant carries exactly the
//! fields its kind needs, and the JSON shape (`{ "type": ..., ...fields }`) doubles as
//! the contract AI-produced instructions must satisfy.

use serde::{Deserialize, Serialize};

/// How a UI element is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorStrategy {
    Role,
    Label,
    Placeholder,
    Text,
    Testid,
    Css,
    Xpath,
}

impl LocatorStrategy {
    pub const ALL: [LocatorStrategy; 7] = [
        LocatorStrategy::Role,
        LocatorStrategy::Label,
        LocatorStrategy::Placeholder,
        LocatorStrategy::Text,
        LocatorStrategy::Testid,
        LocatorStrategy::Css,
        LocatorStrategy::Xpath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::Role => "role",
            LocatorStrategy::Label => "label",
            LocatorStrategy::Placeholder => "placeholder",
            LocatorStrategy::Text => "text",
            LocatorStrategy::Testid => "testid",
            LocatorStrategy::Css => "css",
            LocatorStrategy::Xpath => "xpath",
        }
    }
}

impl std::fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LocatorStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LocatorStrategy::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| format!("unknown locator strategy: {value}"))
    }
}

/// Disambiguating options for a locator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

impl LocatorOptions {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.exact.is_none() && self.level.is_none()
    }
}

/// Strategy + value description of a UI element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorSpec {
    pub strategy: LocatorStrategy,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<LocatorOptions>,
}

impl LocatorSpec {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
            options: None,
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Role,
            value: role.into(),
            options: Some(LocatorOptions {
                name: Some(name.into()),
                ..Default::default()
            }),
        }
    }

    pub fn with_exact(mut self, exact: bool) -> Self {
        let mut options = self.options.take().unwrap_or_default();
        options.exact = Some(exact);
        self.options = Some(options);
        self
    }

    /// Accessible name, when one was given
    pub fn name(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.name.as_deref())
    }

    pub fn is_exact(&self) -> bool {
        self.options.as_ref().and_then(|o| o.exact).unwrap_or(false)
    }
}

/// Where a literal value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValueSpec {
    /// Literal text from the Journey
    Literal { value: String },
    /// Field of the configured actor profile
    Actor { field: String },
    /// Run-scoped unique value, optionally prefixed with a human-readable stem
    RunId {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Field of a named external test-data set
    TestData { dataset: String, field: String },
}

impl ValueSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        ValueSpec::Literal {
            value: value.into(),
        }
    }
}

/// Page load states usable in `waitForLoadState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    Domcontentloaded,
    Networkidle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::Domcontentloaded => "domcontentloaded",
            LoadState::Networkidle => "networkidle",
        }
    }
}

/// Toast severities usable in `expectToast`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Warning,
}

impl ToastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToastKind::Success => "success",
            ToastKind::Error => "error",
            ToastKind::Info => "info",
            ToastKind::Warning => "warning",
        }
    }
}

/// A single executable action or assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Instruction {
    /// Navigate to a URL (relative to the configured base URL)
    Goto {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_until: Option<LoadState>,
    },

    Click {
        locator: LocatorSpec,
    },

    #[serde(rename = "dblclick")]
    DoubleClick {
        locator: LocatorSpec,
    },

    Fill {
        locator: LocatorSpec,
        value: ValueSpec,
    },

    Select {
        locator: LocatorSpec,
        option: String,
    },

    Check {
        locator: LocatorSpec,
    },

    Uncheck {
        locator: LocatorSpec,
    },

    /// Press a key, on an element or on the page
    Press {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<LocatorSpec>,
    },

    Hover {
        locator: LocatorSpec,
    },

    ExpectVisible {
        locator: LocatorSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    ExpectHidden {
        locator: LocatorSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    ExpectText {
        locator: LocatorSpec,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    ExpectUrl {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    ExpectTitle {
        title: String,
    },

    ExpectToast {
        toast_type: ToastKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    WaitForUrl {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    WaitForResponse {
        url_pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    WaitForLoadState {
        state: LoadState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    WaitForVisible {
        locator: LocatorSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },

    /// Call into a hand-written page module (e.g. `auth.login`)
    CallModule {
        module: String,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },

    /// A step that could not be resolved; kept so nothing is silently dropped
    Blocked {
        reason: String,
        source_text: String,
    },
}

impl Instruction {
    pub fn blocked(reason: impl Into<String>, source_text: impl Into<String>) -> Self {
        Instruction::Blocked {
            reason: reason.into(),
            source_text: source_text.into(),
        }
    }

    /// Wire tag of this instruction
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Goto { .. } => "goto",
            Instruction::Click { .. } => "click",
            Instruction::DoubleClick { .. } => "dblclick",
            Instruction::Fill { .. } => "fill",
            Instruction::Select { .. } => "select",
            Instruction::Check { .. } => "check",
            Instruction::Uncheck { .. } => "uncheck",
            Instruction::Press { .. } => "press",
            Instruction::Hover { .. } => "hover",
            Instruction::ExpectVisible { .. } => "expectVisible",
            Instruction::ExpectHidden { .. } => "expectHidden",
            Instruction::ExpectText { .. } => "expectText",
            Instruction::ExpectUrl { .. } => "expectUrl",
            Instruction::ExpectTitle { .. } => "expectTitle",
            Instruction::ExpectToast { .. } => "expectToast",
            Instruction::WaitForUrl { .. } => "waitForUrl",
            Instruction::WaitForResponse { .. } => "waitForResponse",
            Instruction::WaitForLoadState { .. } => "waitForLoadState",
            Instruction::WaitForVisible { .. } => "waitForVisible",
            Instruction::CallModule { .. } => "callModule",
            Instruction::Blocked { .. } => "blocked",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Instruction::Blocked { .. })
    }

    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Instruction::ExpectVisible { .. }
                | Instruction::ExpectHidden { .. }
                | Instruction::ExpectText { .. }
                | Instruction::ExpectUrl { .. }
                | Instruction::ExpectTitle { .. }
                | Instruction::ExpectToast { .. }
        )
    }

    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            Instruction::WaitForUrl { .. }
                | Instruction::WaitForResponse { .. }
                | Instruction::WaitForLoadState { .. }
                | Instruction::WaitForVisible { .. }
        )
    }

    /// Element this instruction targets, if any
    pub fn locator(&self) -> Option<&LocatorSpec> {
        match self {
            Instruction::Click { locator }
            | Instruction::DoubleClick { locator }
            | Instruction::Fill { locator, .. }
            | Instruction::Select { locator, .. }
            | Instruction::Check { locator }
            | Instruction::Uncheck { locator }
            | Instruction::Hover { locator }
            | Instruction::ExpectVisible { locator, .. }
            | Instruction::ExpectHidden { locator, .. }
            | Instruction::ExpectText { locator, .. }
            | Instruction::WaitForVisible { locator, .. } => Some(locator),
            Instruction::Press { locator, .. } => locator.as_ref(),
            _ => None,
        }
    }

    pub fn locator_mut(&mut self) -> Option<&mut LocatorSpec> {
        match self {
            Instruction::Click { locator }
            | Instruction::DoubleClick { locator }
            | Instruction::Fill { locator, .. }
            | Instruction::Select { locator, .. }
            | Instruction::Check { locator }
            | Instruction::Uncheck { locator }
            | Instruction::Hover { locator }
            | Instruction::ExpectVisible { locator, .. }
            | Instruction::ExpectHidden { locator, .. }
            | Instruction::ExpectText { locator, .. }
            | Instruction::WaitForVisible { locator, .. } => Some(locator),
            Instruction::Press { locator, .. } => locator.as_mut(),
            _ => None,
        }
    }

    /// Explicit timeout slot, for variants that carry one
    pub fn timeout_mut(&mut self) -> Option<&mut Option<u64>> {
        match self {
            Instruction::ExpectVisible { timeout, .. }
            | Instruction::ExpectHidden { timeout, .. }
            | Instruction::ExpectText { timeout, .. }
            | Instruction::ExpectUrl { timeout, .. }
            | Instruction::ExpectToast { timeout, .. }
            | Instruction::WaitForUrl { timeout, .. }
            | Instruction::WaitForResponse { timeout, .. }
            | Instruction::WaitForLoadState { timeout, .. }
            | Instruction::WaitForVisible { timeout, .. } => Some(timeout),
            _ => None,
        }
    }

    /// Check the variant's mandatory fields are present and meaningful.
    ///
    /// Serde already guarantees the fields exist; this rejects empty strings and other
    /// values that would render to broken code.
    pub fn validate(&self) -> Result<(), String> {
        fn non_empty(field: &str, value: &str) -> Result<(), String> {
            if value.trim().is_empty() {
                Err(format!("field '{field}' must not be empty"))
            } else {
                Ok(())
            }
        }

        if let Some(locator) = self.locator() {
            non_empty("locator.value", &locator.value)?;
            if let Some(name) = locator.name() {
                non_empty("locator.options.name", name)?;
            }
        }

        match self {
            Instruction::Goto { url, .. } => non_empty("url", url),
            Instruction::Fill { value, .. } => match value {
                ValueSpec::Literal { .. } => Ok(()),
                ValueSpec::Actor { field } => non_empty("value.field", field),
                ValueSpec::RunId { .. } => Ok(()),
                ValueSpec::TestData { dataset, field } => {
                    non_empty("value.dataset", dataset)?;
                    non_empty("value.field", field)
                }
            },
            Instruction::Select { option, .. } => non_empty("option", option),
            Instruction::Press { key, .. } => non_empty("key", key),
            Instruction::ExpectText { text, .. } => non_empty("text", text),
            Instruction::ExpectUrl { pattern, .. } | Instruction::WaitForUrl { pattern, .. } => {
                non_empty("pattern", pattern)
            }
            Instruction::ExpectTitle { title } => non_empty("title", title),
            Instruction::WaitForResponse { url_pattern, .. } => {
                non_empty("urlPattern", url_pattern)
            }
            Instruction::CallModule { module, method, .. } => {
                non_empty("module", module)?;
                non_empty("method", method)
            }
            Instruction::Blocked {
                reason,
                source_text,
            } => {
                non_empty("reason", reason)?;
                non_empty("sourceText", source_text)
            }
            _ => Ok(()),
        }
    }
}

/// One Journey step compiled to instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrStep {
    pub id: String,
    pub description: String,
    pub instructions: Vec<Instruction>,
}

impl IrStep {
    pub fn blocked_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_blocked()).count()
    }
}

/// Journey metadata carried into the IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrJourney {
    pub id: String,
    pub title: String,
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data: Option<String>,
    pub steps: Vec<IrStep>,
}

impl IrJourney {
    pub fn instruction_count(&self) -> usize {
        self.steps.iter().map(|s| s.instructions.len()).sum()
    }

    pub fn blocked_count(&self) -> usize {
        self.steps.iter().map(IrStep::blocked_count).sum()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.steps.iter().flat_map(|s| s.instructions.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_click_wire_shape() {
        let instruction = Instruction::Click {
            locator: LocatorSpec::role("button", "Submit"),
        };
        let value = serde_json::to_value(&instruction).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "click",
                "locator": { "strategy": "role", "value": "button", "options": { "name": "Submit" } }
            })
        );
    }

    #[test]
    fn test_blocked_wire_shape() {
        let instruction = Instruction::blocked("no matching pattern", "Drag the item");
        let value = serde_json::to_value(&instruction).unwrap();
        assert_eq!(
            value,
            json!({ "type": "blocked", "reason": "no matching pattern", "sourceText": "Drag the item" })
        );
    }

    #[test]
    fn test_fill_requires_value() {
        let raw = json!({
            "type": "fill",
            "locator": { "strategy": "label", "value": "Email" }
        });
        assert!(serde_json::from_value::<Instruction>(raw).is_err());
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let raw = json!({
            "type": "click",
            "locator": { "strategy": "shadow", "value": "x" }
        });
        assert!(serde_json::from_value::<Instruction>(raw).is_err());
    }

    #[test]
    fn test_value_spec_variants_parse() {
        let raw = json!({
            "type": "fill",
            "locator": { "strategy": "label", "value": "Email" },
            "value": { "type": "testData", "dataset": "users", "field": "email" }
        });
        let parsed: Instruction = serde_json::from_value(raw).unwrap();
        match parsed {
            Instruction::Fill { value, .. } => assert_eq!(
                value,
                ValueSpec::TestData {
                    dataset: "users".to_string(),
                    field: "email".to_string()
                }
            ),
            other => panic!("unexpected instruction: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let instruction = Instruction::Goto {
            url: "  ".to_string(),
            wait_until: None,
        };
        assert!(instruction.validate().is_err());

        let instruction = Instruction::Click {
            locator: LocatorSpec::new(LocatorStrategy::Text, ""),
        };
        assert!(instruction.validate().is_err());

        let instruction = Instruction::Click {
            locator: LocatorSpec::role("button", "Save"),
        };
        assert!(instruction.validate().is_ok());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("testid".parse::<LocatorStrategy>(), Ok(LocatorStrategy::Testid));
        assert!("id".parse::<LocatorStrategy>().is_err());
    }
}
