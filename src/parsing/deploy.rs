// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deployment resource parameterization
//!
//! Splits the multi-document YAML files of an app's `deployment`
//! directory into per-resource JSON documents, replaces user-variable
//! Secret and ConfigMap data values with substitution tokens, and
//! renders a self-contained deploy script.

use crate::models::{AppDeployment, AppDeployParameter};
use crate::parsing::ParseError;
use anyhow::anyhow;
use base64::Engine;
use serde_json::Value;
use uuid::Uuid;

/// Shell template the deploy script is rendered from
const SCRIPT_TEMPLATE: &str = include_str!("deploy.sh");

/// Per-parameter prompt block inserted into the script template
const PARAM_BLOCK: &str = r#"ID="{{param.id}}"
KEY="{{param.key}}"
DFLT="{{param.dflt}}"
BASE64="{{param.base64}}"

echo
echo "Default value for $KEY is '$DFLT'"
read -r -p "Do you want to change it? (y/n): " choice
case "$choice" in
y|Y|yes|YES|Yes)
    read -r -p "Enter new value for $KEY: " value
    ;;
*)
    value="$DFLT"
    ;;
esac
if [ "$BASE64" = "Y" ]; then
    value=$(printf '%s' "$value" | base64)
fi
if [ -n "$SED_DATA" ]; then
    SED_DATA="$SED_DATA ; "
fi
SED_DATA="${SED_DATA}s|$ID|$value|"
"#;

/// Split deployment file contents into YAML documents.
///
/// A line whose whitespace-stripped form equals `---` separates
/// documents; the trailing accumulator is emitted if non-empty. File
/// order and document order are preserved.
pub fn split_documents(file_texts: &[String]) -> Vec<String> {
    let mut documents = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for text in file_texts {
        for line in text.split('\n') {
            if line.replace(' ', "") == "---" {
                if !lines.is_empty() {
                    documents.push(lines.join("\n"));
                    lines.clear();
                }
            } else {
                lines.push(line);
            }
        }

        if !lines.is_empty() {
            documents.push(lines.join("\n"));
            lines.clear();
        }
    }

    documents
}

/// Derive the substitution token for a resource data key.
///
/// Tokens are UUIDv5 values over `kind/name/key`, so re-parsing the
/// same content yields the same token and the app version stays a pure
/// function of content.
fn substitution_token(kind: &str, resource_name: &str, key: &str) -> String {
    let material = format!("{kind}/{resource_name}/{key}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes()).to_string()
}

fn resource_name(resource: &Value) -> String {
    resource
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Replace every Secret data value with a substitution token.
///
/// Secret data values arrive base64 encoded; the decoded form becomes
/// the parameter's default value and the token is stored literally so
/// it appears exactly once in the parameterized document.
fn parameterize_secret(
    resource: &mut Value,
    params: &mut Vec<AppDeployParameter>,
) -> Result<(), anyhow::Error> {
    let name = resource_name(resource);

    let Some(data) = resource.get_mut("data") else {
        return Ok(());
    };

    let data = data
        .as_object_mut()
        .ok_or_else(|| anyhow!("Secret data field is not an object"))?;

    for (key, value) in data.iter_mut() {
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow!("Secret data value for key {key:?} is not a string"))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| anyhow!("Secret data value for key {key:?} is not base64: {err}"))?;

        let token = substitution_token("Secret", &name, key);
        params.push(AppDeployParameter {
            substitution: token.clone(),
            display_name: format!("\"{key}\" key in \"{name}\" Secret"),
            default_value: String::from_utf8_lossy(&decoded).into_owned(),
            requires_base64: true,
        });

        *value = Value::String(token);
    }

    Ok(())
}

/// Replace every ConfigMap data value with a substitution token
fn parameterize_config_map(
    resource: &mut Value,
    params: &mut Vec<AppDeployParameter>,
) -> Result<(), anyhow::Error> {
    let name = resource_name(resource);

    let Some(data) = resource.get_mut("data") else {
        return Ok(());
    };

    let data = data
        .as_object_mut()
        .ok_or_else(|| anyhow!("ConfigMap data field is not an object"))?;

    for (key, value) in data.iter_mut() {
        let plain = value
            .as_str()
            .ok_or_else(|| anyhow!("ConfigMap data value for key {key:?} is not a string"))?;

        let token = substitution_token("ConfigMap", &name, key);
        params.push(AppDeployParameter {
            substitution: token.clone(),
            display_name: format!("\"{key}\" key in \"{name}\" ConfigMap"),
            default_value: plain.to_string(),
            requires_base64: false,
        });

        *value = Value::String(token);
    }

    Ok(())
}

/// Build an [`AppDeployment`] from the ordered contents of an app's
/// `deployment` directory.
///
/// Parsing continues past individual bad resources; every failure is
/// reported against `what_dir`. The raw and parameterized sequences
/// stay index aligned.
pub fn build_deployment(what_dir: &str, file_texts: &[String]) -> (AppDeployment, Vec<ParseError>) {
    let mut errs = Vec::new();
    let mut resources = Vec::new();
    let mut parameterized = Vec::new();
    let mut params = Vec::new();

    for document in split_documents(file_texts) {
        let mut resource: Value = match serde_yaml::from_str(&document) {
            Ok(value) => value,
            Err(err) => {
                errs.push(ParseError::user(
                    what_dir,
                    format!("failed to parse file as YAML: {err}"),
                    "fix any YAML syntax errors",
                ));
                continue;
            }
        };

        let kind = resource
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let api_version = resource
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if kind == "Namespace" {
            errs.push(ParseError::user(
                what_dir,
                "resources of type Namespace are not allowed",
                "remove all Namespace resources",
            ));
            continue;
        }

        let namespace = resource
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !namespace.is_empty() {
            errs.push(ParseError::user(
                what_dir,
                "resources may not have a metadata.namespace field",
                "ensure resources do not have a metadata.namespace field",
            ));
            continue;
        }

        let raw_json = match serde_json::to_string(&resource) {
            Ok(json) => json,
            Err(err) => {
                errs.push(ParseError::internal(
                    what_dir,
                    "failed to save resource as JSON",
                    err.into(),
                ));
                continue;
            }
        };

        resources.push(raw_json.clone());

        // Only v1 API resources are parameterized; everything else
        // passes through unchanged.
        if api_version != "v1" {
            parameterized.push(raw_json);
            continue;
        }

        let result = match kind.as_str() {
            "Secret" => parameterize_secret(&mut resource, &mut params)
                .map_err(|err| ("failed to parse resource as v1.Secret", err)),
            "ConfigMap" => parameterize_config_map(&mut resource, &mut params)
                .map_err(|err| ("failed to parse resource as v1.ConfigMap", err)),
            _ => {
                parameterized.push(raw_json);
                continue;
            }
        };

        if let Err((why, err)) = result {
            // Keep the sequences index aligned even for a bad resource.
            resources.pop();
            errs.push(ParseError::internal(what_dir, why, err));
            continue;
        }

        match serde_json::to_string(&resource) {
            Ok(json) => parameterized.push(json),
            Err(err) => {
                resources.pop();
                errs.push(ParseError::internal(
                    what_dir,
                    "failed to save resource as JSON",
                    err.into(),
                ));
            }
        }
    }

    let deploy_script = render_deploy_script(&params, &parameterized.join("\n"));

    (
        AppDeployment {
            resources,
            parameterized_resources: parameterized,
            parameters: params,
            deploy_script,
        },
        errs,
    )
}

/// Render the deploy script: one prompt block per parameter plus the
/// parameterized resources embedded textually.
fn render_deploy_script(params: &[AppDeployParameter], resources_blob: &str) -> String {
    let mut blocks = String::new();

    for param in params {
        let requires_base64 = if param.requires_base64 { "Y" } else { "N" };

        let block = PARAM_BLOCK
            .replace("{{param.id}}", &param.substitution)
            .replace("{{param.key}}", &param.display_name)
            .replace("{{param.dflt}}", &param.default_value)
            .replace("{{param.base64}}", requires_base64);

        blocks.push_str(&block);
        blocks.push('\n');
    }

    SCRIPT_TEMPLATE
        .replace("{{{replacement.script}}}", blocks.trim_end())
        .replace("{{{resources.json}}}", resources_blob)
}
