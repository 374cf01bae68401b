//! Typed field sets for every built-in step type.
//!
//! Skill generators are loose about field types (`"time": 3` and
//! `"time": "wait_secs"` both occur), so fields that may hold either a literal
//! or a symbol name are kept as `Value` and resolved by the handler.

use crate::skill::string_or_number;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step types the interpreter executes itself. Anything else must be
/// registered as an external op.
pub const BUILTIN_STEP_TYPES: &[&str] = &[
    "Check Condition",
    "Repeat",
    "Goto",
    "Stub",
    "Call Function",
    "Return",
    "Use Skill",
    "Overload Skill",
    "Exception Handler",
    "End Exception",
    "Halt",
    "Create Data",
    "Fill Data",
    "Load Data",
    "Save Data",
    "List Dir",
    "Check Existence",
    "Text To Number",
    "Call Extern",
    "Wait",
    "Wait Until",
    "Create Dir",
    "Read File",
    "Write File",
    "Delete File",
    "Extract Info",
    "Save Html",
    "Search",
    "Search Anchor Info",
    "Search Word Line",
    "Search Scroll",
    "Text Line Location Record",
    "Calibrate Scroll",
    "Mouse Click",
    "Mouse Move",
    "Mouse Scroll",
    "Key Input",
    "Text Input",
    "App Open",
    "Open App",
    "Get Windows Info",
    "Bring Window To Front",
];

fn default_direct() -> String {
    "direct".to_string()
}

fn default_na() -> String {
    "NA".to_string()
}

fn default_any() -> String {
    "any".to_string()
}

fn default_anchor_text() -> String {
    "anchor text".to_string()
}

// ---- control ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConditionArgs {
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatArgs {
    /// Loop counter name for counted loops.
    #[serde(default)]
    pub lc_name: String,
    /// Guard expression; empty means a counted loop.
    #[serde(default)]
    pub until: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub count: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotoArgs {
    #[serde(deserialize_with = "string_or_number")]
    pub goto: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubArgs {
    pub stub_name: String,
    #[serde(default)]
    pub func_name: String,
    #[serde(default)]
    pub fargs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFunctionArgs {
    pub fname: String,
    /// Name of the variable passed as the argument.
    #[serde(default)]
    pub fargs: String,
    /// Name that receives the result; empty discards it.
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnArgs {
    #[serde(default)]
    pub val_var_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseSkillArgs {
    pub skill_name: String,
    #[serde(default)]
    pub skill_path: String,
    #[serde(default)]
    pub skill_args: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverloadSkillArgs {
    pub skill_name: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionHandlerArgs {
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub cdata: Value,
    pub max_retries: Option<u32>,
    pub min_retry_back_off: Option<u64>,
    pub max_retry_back_off: Option<u64>,
    pub site: Option<String>,
}

// ---- data ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataArgs {
    #[serde(default)]
    pub data_type: String,
    pub data_name: String,
    /// `"NA"` stores `key_value` directly, otherwise `{key_name: key_value}`.
    #[serde(default = "default_na")]
    pub key_name: String,
    #[serde(default)]
    pub key_value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillDataArgs {
    #[serde(default = "default_direct")]
    pub fill_type: String,
    #[serde(default)]
    pub from: Value,
    pub to: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFileArgs {
    pub data_name: String,
    pub file_link: String,
}

/// `name_type` other than `"direct"` means the path is an expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDirArgs {
    pub dir: String,
    #[serde(default = "default_direct")]
    pub name_type: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileArgs {
    pub filename: String,
    #[serde(default = "default_direct")]
    pub name_type: String,
    /// `"json"` parses the file; anything else reads it as text.
    #[serde(default)]
    pub filetype: String,
    pub datasink: String,
    #[serde(default)]
    pub flag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileArgs {
    pub filename: String,
    #[serde(default = "default_direct")]
    pub name_type: String,
    #[serde(default)]
    pub filetype: String,
    pub datasource: String,
    /// `"overwrite"` replaces the file; anything else appends.
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileArgs {
    pub filename: String,
    #[serde(default = "default_direct")]
    pub name_type: String,
    #[serde(default)]
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDirArgs {
    pub dir: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub sort_by: String,
    #[serde(default)]
    pub sort_order: String,
    /// Only files modified within this many hours.
    #[serde(default)]
    pub most_recent: Value,
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckExistenceArgs {
    #[serde(default)]
    pub fntype: String,
    pub file: String,
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToNumberArgs {
    pub intext: String,
    pub numvar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallExternArgs {
    pub file: String,
    /// Variable names passed as process arguments, as a list or JSON text.
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitArgs {
    #[serde(default)]
    pub time: Value,
    #[serde(default)]
    pub random_min: Value,
    #[serde(default)]
    pub random_max: Value,
}

/// Polls `events` (names or conditions) until they hold or `time_out` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitUntilArgs {
    pub events: Value,
    /// `"all"` or `"any"`.
    #[serde(default)]
    pub events_relation: String,
    #[serde(default)]
    pub time_out: Value,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub flag: String,
}

// ---- screen ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractInfoArgs {
    #[serde(default)]
    pub settings: Value,
    pub data_sink: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub page_data_info: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub win_title_kw: String,
    /// Optional flag set to whether anything was read.
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchArgs {
    pub screen: String,
    pub names: Value,
    /// `"direct"` names are literals; anything else is evaluated.
    #[serde(default = "default_direct")]
    pub name_type: String,
    #[serde(default)]
    pub target_types: Value,
    #[serde(default = "default_any")]
    pub logic: String,
    pub result: String,
    pub status: String,
    /// Site pinged when nothing is found; the configured reference site if empty.
    #[serde(default)]
    pub site: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchWordLineArgs {
    pub screen: String,
    pub patterns: Value,
    #[serde(default = "default_any")]
    pub logic: String,
    pub result: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchScrollArgs {
    pub screen: String,
    pub target: String,
    #[serde(default = "default_anchor_text")]
    pub target_type: String,
    /// Desired vertical position of the target, in percent of window height.
    #[serde(default)]
    pub target_loc: Value,
    #[serde(default)]
    pub resolution: Value,
    #[serde(default)]
    pub postwait: Value,
    #[serde(default)]
    pub flag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveHtmlArgs {
    /// Where to save the page; a file under the work directory when empty.
    #[serde(default)]
    pub local: String,
    #[serde(default)]
    pub template: String,
    pub data_sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLineLocationArgs {
    pub screen: String,
    pub text: String,
    pub to: String,
}

// ---- input ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseClickArgs {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub action_args: Value,
    #[serde(default)]
    pub screen: String,
    pub target_name: Value,
    #[serde(default = "default_anchor_text")]
    pub target_type: String,
    #[serde(default)]
    pub nth: Value,
    #[serde(default)]
    pub offset_from: String,
    #[serde(default)]
    pub offset_unit: String,
    #[serde(default)]
    pub offset: Value,
    #[serde(default)]
    pub move_pause: Value,
    #[serde(default)]
    pub post_move: Value,
    #[serde(default)]
    pub post_wait: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseScrollArgs {
    #[serde(default)]
    pub action: String,
    pub amount: Value,
    /// `"screen"` means `amount` is a percentage of the window height.
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub resolution: Value,
    #[serde(default)]
    pub random_min: Value,
    #[serde(default)]
    pub random_max: Value,
    #[serde(default)]
    pub postwait: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrateScrollArgs {
    #[serde(default)]
    pub screen: String,
    /// Name or text of a record visible before and after the calibration scroll.
    pub marker: String,
    /// Units scrolled between the two screen reads.
    pub amount: Value,
    /// Holds the marker's earlier box, or an `[x, y]` point.
    pub last_record: String,
    #[serde(default)]
    pub data_sink: String,
}

/// Relative move when both destinations are blank, absolute otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseMoveArgs {
    #[serde(default)]
    pub x_amount_var: Value,
    #[serde(default)]
    pub y_amount_var: Value,
    #[serde(default)]
    pub x_destination_var: Value,
    #[serde(default)]
    pub y_destination_var: Value,
    #[serde(default)]
    pub postwait: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWindowsInfoArgs {
    /// Index into the window list; blank lists every window.
    #[serde(default)]
    pub nth_var: Value,
    pub results_var: String,
    #[serde(default)]
    pub flag_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BringWindowToFrontArgs {
    /// Expression or name holding the window title.
    pub title_var: String,
    #[serde(default)]
    pub flag_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInputArgs {
    #[serde(default)]
    pub action: String,
    /// Comma separated keys, pressed together.
    pub action_value: String,
    #[serde(default)]
    pub wait_after: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextInputArgs {
    #[serde(default = "default_direct")]
    pub txt_ref_type: String,
    pub text: Value,
    /// Seconds between characters.
    #[serde(default)]
    pub speed: Value,
    #[serde(default)]
    pub key_after: String,
    #[serde(default)]
    pub wait_after: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAppArgs {
    #[serde(default)]
    pub app_type: String,
    pub app_link: String,
    #[serde(default = "default_direct")]
    pub cargs_type: String,
    #[serde(default)]
    pub cargs: Value,
    #[serde(default)]
    pub wait: Value,
    #[serde(default)]
    pub result: String,
}
