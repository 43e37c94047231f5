//! Closed step type table and normalization of raw step type strings.
//!
//! The remote API reports step types in several spellings ("ToolPlacing",
//! "tool-placing", "TOOLPLACING", "Tool Placing Step", ...). They are folded
//! onto the closed table below; anything else falls back to
//! `WORK_INSTRUCTION` while the original string is kept for diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    #[default]
    WorkInstruction,
    ToolPlacing,
    ToolTaking,
    ObjectPlacing,
    ObjectTaking,
    PickingBinPlacing,
    PickingBinTaking,
    Activity,
    CheckNoChangeZone,
    CheckVariable,
    VirtualButtonPress,
    MaterialGrab,
    Composite,
    Component,
    Job,
    Dialog,
}

impl StepType {
    pub const ALL: [StepType; 16] = [
        StepType::WorkInstruction,
        StepType::ToolPlacing,
        StepType::ToolTaking,
        StepType::ObjectPlacing,
        StepType::ObjectTaking,
        StepType::PickingBinPlacing,
        StepType::PickingBinTaking,
        StepType::Activity,
        StepType::CheckNoChangeZone,
        StepType::CheckVariable,
        StepType::VirtualButtonPress,
        StepType::MaterialGrab,
        StepType::Composite,
        StepType::Component,
        StepType::Job,
        StepType::Dialog,
    ];

    /// Wire key (e.g. `TOOL_PLACING`)
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::WorkInstruction => "WORK_INSTRUCTION",
            StepType::ToolPlacing => "TOOL_PLACING",
            StepType::ToolTaking => "TOOL_TAKING",
            StepType::ObjectPlacing => "OBJECT_PLACING",
            StepType::ObjectTaking => "OBJECT_TAKING",
            StepType::PickingBinPlacing => "PICKING_BIN_PLACING",
            StepType::PickingBinTaking => "PICKING_BIN_TAKING",
            StepType::Activity => "ACTIVITY",
            StepType::CheckNoChangeZone => "CHECK_NO_CHANGE_ZONE",
            StepType::CheckVariable => "CHECK_VARIABLE",
            StepType::VirtualButtonPress => "VIRTUAL_BUTTON_PRESS",
            StepType::MaterialGrab => "MATERIAL_GRAB",
            StepType::Composite => "COMPOSITE",
            StepType::Component => "COMPONENT",
            StepType::Job => "JOB",
            StepType::Dialog => "DIALOG",
        }
    }

    /// Human-readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            StepType::WorkInstruction => "Work Instruction",
            StepType::ToolPlacing => "Tool Placing",
            StepType::ToolTaking => "Tool Taking",
            StepType::ObjectPlacing => "Object Placing",
            StepType::ObjectTaking => "Object Taking",
            StepType::PickingBinPlacing => "Picking Bin Placing",
            StepType::PickingBinTaking => "Picking Bin Taking",
            StepType::Activity => "Activity",
            StepType::CheckNoChangeZone => "Check No Change Zone",
            StepType::CheckVariable => "Check Variable",
            StepType::VirtualButtonPress => "Virtual Button Press",
            StepType::MaterialGrab => "Material Grab",
            StepType::Composite => "Composite",
            StepType::Component => "Component",
            StepType::Job => "Job",
            StepType::Dialog => "Dialog",
        }
    }

    /// Exact lookup by wire key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == key)
    }

    /// Remote `ChildStepOrder` for a step of this type
    pub fn child_step_order(&self) -> &'static str {
        match self {
            StepType::Composite => "Sequential",
            _ => "None",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spellings with the separators squashed out
fn alias(squashed: &str) -> Option<StepType> {
    match squashed {
        "WORKINSTRUCTION" => Some(StepType::WorkInstruction),
        "TOOLPLACING" => Some(StepType::ToolPlacing),
        "TOOLTAKING" => Some(StepType::ToolTaking),
        "OBJECTPLACING" => Some(StepType::ObjectPlacing),
        "OBJECTTAKING" => Some(StepType::ObjectTaking),
        "PICKINGBINPLACING" => Some(StepType::PickingBinPlacing),
        "PICKINGBINTAKING" => Some(StepType::PickingBinTaking),
        "CHECKNOCHANGEZONE" => Some(StepType::CheckNoChangeZone),
        "CHECKVARIABLE" => Some(StepType::CheckVariable),
        "VIRTUALBUTTONPRESS" => Some(StepType::VirtualButtonPress),
        "MATERIALGRAB" => Some(StepType::MaterialGrab),
        _ => None,
    }
}

/// Fold a raw step type into SCREAMING_SNAKE form without validating it
fn canonicalize(raw: &str) -> String {
    let spaced = WHITESPACE.replace_all(raw, "_").replace('-', "_");

    // camelCase boundaries: ToolPlacing -> Tool_Placing
    let mut snake = String::with_capacity(spaced.len() + 4);
    let mut prev: Option<char> = None;
    for c in spaced.chars() {
        if c.is_ascii_uppercase()
            && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            snake.push('_');
        }
        snake.push(c);
        prev = Some(c);
    }

    let mut upper = snake.to_uppercase();
    if let Some(stripped) = upper.strip_suffix("_STEP") {
        upper = stripped.to_string();
    }
    if let Some(stripped) = upper.strip_suffix("STEP") {
        upper = stripped.to_string();
    }

    UNDERSCORES
        .replace_all(&upper, "_")
        .trim_matches('_')
        .to_string()
}

/// Normalize a raw step type string.
///
/// Returns the matched type and, when the value was not recognized, the
/// original (trimmed) string. Empty input maps to the default type with no
/// raw value.
pub fn normalize_step_type(value: &str) -> (StepType, Option<String>) {
    let raw = value.trim();
    if raw.is_empty() {
        return (StepType::default(), None);
    }

    let canonical = canonicalize(raw);
    if let Some(step_type) = StepType::from_key(&canonical) {
        return (step_type, None);
    }
    if let Some(step_type) = alias(&canonical) {
        return (step_type, None);
    }

    warn!(
        raw = raw,
        normalized = %canonical,
        "Unknown step type; falling back to {}",
        StepType::default()
    );
    (StepType::default(), Some(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_wire_key_round_trips() {
        for step_type in StepType::ALL {
            assert_eq!(normalize_step_type(step_type.as_str()), (step_type, None));
        }
    }

    #[test]
    fn test_every_display_name_normalizes() {
        for step_type in StepType::ALL {
            assert_eq!(
                normalize_step_type(step_type.display_name()),
                (step_type, None),
                "display name {:?}",
                step_type.display_name()
            );
        }
    }

    #[test]
    fn test_alias_table() {
        let cases = [
            ("WORKINSTRUCTION", StepType::WorkInstruction),
            ("workinstruction", StepType::WorkInstruction),
            ("TOOLPLACING", StepType::ToolPlacing),
            ("tooltaking", StepType::ToolTaking),
            ("OBJECTPLACING", StepType::ObjectPlacing),
            ("objecttaking", StepType::ObjectTaking),
            ("PICKINGBINPLACING", StepType::PickingBinPlacing),
            ("pickingbintaking", StepType::PickingBinTaking),
            ("CHECKNOCHANGEZONE", StepType::CheckNoChangeZone),
            ("checkvariable", StepType::CheckVariable),
            ("VIRTUALBUTTONPRESS", StepType::VirtualButtonPress),
            ("materialgrab", StepType::MaterialGrab),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_step_type(raw), (expected, None), "alias {raw}");
        }
    }

    #[test]
    fn test_camel_case_and_separators() {
        let cases = [
            ("ToolPlacing", StepType::ToolPlacing),
            ("toolPlacing", StepType::ToolPlacing),
            ("virtualButtonPress", StepType::VirtualButtonPress),
            ("tool-placing", StepType::ToolPlacing),
            ("Check No Change Zone", StepType::CheckNoChangeZone),
            ("check  no\tchange-zone", StepType::CheckNoChangeZone),
            ("tool__placing", StepType::ToolPlacing),
            ("_composite_", StepType::Composite),
            ("  Dialog  ", StepType::Dialog),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_step_type(raw), (expected, None), "input {raw:?}");
        }
    }

    #[test]
    fn test_step_suffix_is_stripped() {
        assert_eq!(
            normalize_step_type("MaterialGrabStep"),
            (StepType::MaterialGrab, None)
        );
        assert_eq!(
            normalize_step_type("COMPOSITE_STEP"),
            (StepType::Composite, None)
        );
        assert_eq!(normalize_step_type("JobStep"), (StepType::Job, None));
        assert_eq!(
            normalize_step_type("toolplacingstep"),
            (StepType::ToolPlacing, None)
        );
    }

    #[test]
    fn test_empty_falls_back_without_raw() {
        assert_eq!(normalize_step_type(""), (StepType::WorkInstruction, None));
        assert_eq!(normalize_step_type("   "), (StepType::WorkInstruction, None));
    }

    #[test]
    fn test_unknown_keeps_raw() {
        assert_eq!(
            normalize_step_type("Banana"),
            (StepType::WorkInstruction, Some("Banana".to_string()))
        );
        assert_eq!(
            normalize_step_type(" Step "),
            (StepType::WorkInstruction, Some("Step".to_string()))
        );
    }

    #[test]
    fn test_child_step_order() {
        assert_eq!(StepType::Composite.child_step_order(), "Sequential");
        assert_eq!(StepType::ToolTaking.child_step_order(), "None");
    }

    #[test]
    fn test_serde_uses_wire_keys() {
        let json = serde_json::to_string(&StepType::CheckNoChangeZone).unwrap();
        assert_eq!(json, "\"CHECK_NO_CHANGE_ZONE\"");
        let back: StepType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepType::CheckNoChangeZone);
    }
}
