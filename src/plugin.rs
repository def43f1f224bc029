//! Host-side mutation plugin.
//!
//! Runs inside the CAD engine once the automation sandbox reports the
//! document is open. The engine is reached only through [`FamilyDocument`];
//! the handler resizes a family and saves it in place.

use serde_json::Value;
use thiserror::Error;

/// Family parameter holding the width
pub const WIDTH_PARAMETER: &str = "Width";
/// Family parameter holding the height
pub const HEIGHT_PARAMETER: &str = "Height";

#[derive(Error, Debug, PartialEq)]
pub enum PluginError {
    #[error("Parameter {0} is not staged")]
    NotStaged(String),

    #[error("Malformed parameters: {0}")]
    Malformed(String),

    #[error("Host error: {0}")]
    Host(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Family,
    Project,
    Other,
}

/// The open document, as exposed by the host
pub trait FamilyDocument {
    fn kind(&self) -> DocumentKind;

    /// Current numeric value of a parameter
    fn parameter(&self, name: &str) -> Option<f64>;

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), PluginError>;

    /// Save over the opened file
    fn save(&mut self) -> Result<(), PluginError>;
}

/// Dimensions to apply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagedParameters {
    pub width: f64,
    pub height: f64,
}

impl StagedParameters {
    /// Parse a staged `params.json`.
    ///
    /// Accepts the single-quoted form produced by inline data URLs, and
    /// values given as numbers or numeric strings.
    pub fn from_json(text: &str) -> Result<Self, PluginError> {
        let trimmed = text.trim();
        let value: Value = serde_json::from_str(trimmed)
            .or_else(|_| serde_json::from_str(&trimmed.replace('\'', "\"")))
            .map_err(|e| PluginError::Malformed(e.to_string()))?;

        Ok(Self {
            width: number(&value, WIDTH_PARAMETER)?,
            height: number(&value, HEIGHT_PARAMETER)?,
        })
    }

    /// Read the values already staged into the document's parameters
    pub fn from_document(document: &dyn FamilyDocument) -> Result<Self, PluginError> {
        let read = |name: &str| {
            document
                .parameter(name)
                .ok_or_else(|| PluginError::NotStaged(name.to_string()))
        };
        Ok(Self {
            width: read(WIDTH_PARAMETER)?,
            height: read(HEIGHT_PARAMETER)?,
        })
    }
}

fn number(value: &Value, key: &str) -> Result<f64, PluginError> {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| PluginError::Malformed(format!("{} is out of range", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| PluginError::Malformed(format!("{} is not a number: '{}'", key, s))),
        Some(_) => Err(PluginError::Malformed(format!("{} is not a number", key))),
        None => Err(PluginError::NotStaged(key.to_string())),
    }
}

/// State handed to the handler when the host is ready
pub struct ReadyEvent<'a> {
    pub document: &'a mut dyn FamilyDocument,
    /// Parameters delivered alongside the document, if any
    pub staged: Option<StagedParameters>,
    pub succeeded: bool,
}

impl<'a> ReadyEvent<'a> {
    pub fn new(document: &'a mut dyn FamilyDocument) -> Self {
        Self {
            document,
            staged: None,
            succeeded: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ModifyFamilyHandler;

impl ModifyFamilyHandler {
    /// Apply the staged dimensions and save. Any failure marks the event
    /// failed, which fails the work item.
    pub fn on_ready(&self, event: &mut ReadyEvent<'_>) -> Result<(), PluginError> {
        if event.document.kind() != DocumentKind::Family {
            tracing::info!("Not a family document, nothing to do");
            event.succeeded = true;
            return Ok(());
        }

        match Self::apply(event) {
            Ok(params) => {
                tracing::info!("Resized family to {} x {}", params.width, params.height);
                event.succeeded = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to modify family: {}", e);
                event.succeeded = false;
                Err(e)
            }
        }
    }

    fn apply(event: &mut ReadyEvent<'_>) -> Result<StagedParameters, PluginError> {
        let params = match event.staged {
            Some(params) => params,
            None => StagedParameters::from_document(&*event.document)?,
        };

        event.document.set_parameter(WIDTH_PARAMETER, params.width)?;
        event.document.set_parameter(HEIGHT_PARAMETER, params.height)?;
        event.document.save()?;
        Ok(params)
    }
}
