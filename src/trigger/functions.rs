//! Named functions a trigger can invoke.
//!
//! | `fn`           | Source object               | Bucket                                  |
//! |----------------|-----------------------------|-----------------------------------------|
//! | `oppHistory`   | `SF_OBJECT_NAME`            | `params.bucketName`, else `BUCKET_NAME` |
//! | `exportObject` | `params.objectName` (required) | `params.bucketName`, else `BUCKET_NAME` |

use serde::Deserialize;
use tracing::info;

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::AppError;
use crate::export::pipeline::{run_export, ExportRequest};
use crate::salesforce::soql::validate_identifier;

pub const OPP_HISTORY: &str = "oppHistory";
pub const EXPORT_OBJECT: &str = "exportObject";

/// Body of an HTTP trigger: `{ "fn": "...", "params": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Invocation {
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub params: FunctionParams,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionParams {
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
}

impl Invocation {
    pub fn new(function: impl Into<String>, params: FunctionParams) -> Self {
        Self {
            function: function.into(),
            params,
        }
    }

    /// Reads an event payload.
    ///
    /// Payloads shaped like an HTTP trigger body are honoured as-is. Anything
    /// else runs `oppHistory` with whatever parameters the payload carries.
    pub fn from_event(payload: serde_json::Value) -> Self {
        if let Ok(invocation) = serde_json::from_value::<Invocation>(payload.clone()) {
            return invocation;
        }
        let params = serde_json::from_value::<FunctionParams>(payload).unwrap_or_default();
        Self::new(OPP_HISTORY, params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFunction {
    OppHistory,
    ExportObject,
}

impl ExportFunction {
    pub fn from_name(name: &str) -> Result<Self, AppError> {
        match name {
            OPP_HISTORY => Ok(ExportFunction::OppHistory),
            EXPORT_OBJECT => Ok(ExportFunction::ExportObject),
            other => Err(AppError::UnknownFunction(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExportFunction::OppHistory => OPP_HISTORY,
            ExportFunction::ExportObject => EXPORT_OBJECT,
        }
    }

    /// Resolves parameters against configuration.
    pub fn request(self, config: &AppConfig, params: &FunctionParams) -> Result<ExportRequest, AppError> {
        let object_name = match self {
            ExportFunction::OppHistory => config.export.object_name.clone(),
            ExportFunction::ExportObject => non_empty(params.object_name.as_deref())
                .ok_or_else(|| AppError::Config(format!("{} requires params.objectName", EXPORT_OBJECT)))?
                .to_string(),
        };
        validate_identifier(&object_name)?;

        let bucket = non_empty(params.bucket_name.as_deref())
            .unwrap_or(&config.storage.bucket_name)
            .to_string();

        Ok(ExportRequest { object_name, bucket })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Runs the named function and returns the success message.
pub async fn invoke(ctx: &AppContext, invocation: &Invocation) -> Result<String, AppError> {
    let function = ExportFunction::from_name(&invocation.function)?;
    let request = function.request(ctx.config(), &invocation.params)?;

    info!(
        "[TRIGGER] {} -> {} into {}",
        function.name(),
        request.object_name,
        request.bucket
    );

    let outcome = run_export(ctx, &request).await?;
    Ok(format!("finished writing file {}", outcome.file_name))
}
