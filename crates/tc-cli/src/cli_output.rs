//! The JSON envelope every trafficcontrol subcommand prints on exit.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CliOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), data: None }
    }

    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }

    /// Print the JSON envelope to stdout and translate `success` into a
    /// process exit code: 0 on success, 1 on failure.
    pub fn print_and_exit(self) -> ! {
        let code = if self.success { 0 } else { 1 };
        match serde_json::to_string_pretty(&self) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{{\"success\":false,\"message\":\"failed to serialize output\"}}"),
        }
        std::process::exit(code);
    }
}
