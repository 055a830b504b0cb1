//! Line-oriented JSON bridge on stdin/stdout.
//!
//! Requests arrive one per line as `{id, method, params}` and are answered
//! with `{id, result}` or `{id, error}`. Service events are pushed
//! unsolicited as `{event, payload}`. Log output goes to stderr so it can
//! never corrupt the protocol stream.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::config::{ConfigPatch, Profile};
use crate::service::NamefixService;

#[derive(Deserialize)]
struct DirectoryParams {
    directory: String,
}

#[derive(Deserialize)]
struct DirectoriesParams {
    directories: Vec<String>,
}

#[derive(Deserialize)]
struct EnabledParams {
    enabled: bool,
}

#[derive(Deserialize)]
struct DesiredParams {
    #[serde(default)]
    desired: Option<bool>,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct ProfileParams {
    profile: Profile,
}

#[derive(Deserialize)]
struct ToggleProfileParams {
    id: String,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderParams {
    ordered_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SetConfigParams {
    config: ConfigPatch,
}

/// Serve the bridge protocol until stdin closes or a `shutdown` request
/// arrives. The service is stopped on the way out.
pub async fn serve(service: NamefixService) -> std::io::Result<()> {
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Push every service event as {event, payload}.
    let event_tx = out_tx.clone();
    let _subscription = service.on(move |event| {
        let message = json!({
            "event": event.name(),
            "payload": event.payload(),
        });
        if event_tx.try_send(message.to_string()).is_err() {
            tracing::warn!("[bridge] event channel full; dropping {}", event.name());
        }
    });

    crate::log_event!("bridge", "serving");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("[bridge] unparsable request: {e}");
                continue;
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        if method == "shutdown" {
            let _ = out_tx.send(json!({"id": id, "result": true}).to_string()).await;
            break;
        }

        let reply = match dispatch(&service, &method, params).await {
            Ok(result) => json!({"id": id, "result": result}),
            Err(message) => json!({"id": id, "error": message}),
        };
        let _ = out_tx.send(reply.to_string()).await;
    }

    let _ = service.stop().await;
    drop(_subscription);
    drop(out_tx);
    let _ = writer.await;
    crate::log_event!("bridge", "closed");
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}

fn reply<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Route one request to the orchestrator. Method names mirror the
/// orchestrator surface in camelCase.
async fn dispatch(service: &NamefixService, method: &str, params: Value) -> Result<Value, String> {
    match method {
        "getStatus" => reply(service.get_status().await),
        "start" => reply(service.start().await.map_err(|e| e.to_string())?),
        "stop" => reply(service.stop().await.map_err(|e| e.to_string())?),
        "toggleRunning" => {
            let params: DesiredParams = if params.is_null() {
                DesiredParams { desired: None }
            } else {
                parse(params)?
            };
            reply(
                service
                    .toggle_running(params.desired)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "getConfig" => reply(service.get_config().await.map_err(|e| e.to_string())?),
        "setConfig" => {
            let params: SetConfigParams = parse(params)?;
            reply(
                service
                    .set_config(params.config)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "setDryRun" => {
            let params: EnabledParams = parse(params)?;
            reply(
                service
                    .set_dry_run(params.enabled)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "setLaunchOnLogin" => {
            let params: EnabledParams = parse(params)?;
            reply(
                service
                    .set_launch_on_login(params.enabled)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "listDirectories" => reply(
            service
                .list_directories()
                .await
                .map_err(|e| e.to_string())?,
        ),
        "addWatchDir" => {
            let params: DirectoryParams = parse(params)?;
            reply(
                service
                    .add_watch_dir(&params.directory)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "removeWatchDir" => {
            let params: DirectoryParams = parse(params)?;
            reply(
                service
                    .remove_watch_dir(&params.directory)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "setPrimaryWatchDir" => {
            let params: DirectoryParams = parse(params)?;
            reply(
                service
                    .set_primary_watch_dir(&params.directory)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "setWatchDirs" => {
            let params: DirectoriesParams = parse(params)?;
            reply(
                service
                    .set_watch_dirs(params.directories)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "undo" => reply(service.undo_last().await),
        "getProfiles" => reply(service.get_profiles().await.map_err(|e| e.to_string())?),
        "getProfile" => {
            let params: IdParams = parse(params)?;
            reply(
                service
                    .get_profile(&params.id)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "setProfile" => {
            let params: ProfileParams = parse(params)?;
            reply(
                service
                    .set_profile(params.profile)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "deleteProfile" => {
            let params: IdParams = parse(params)?;
            reply(
                service
                    .delete_profile(&params.id)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "toggleProfile" => {
            let params: ToggleProfileParams = parse(params)?;
            reply(
                service
                    .toggle_profile(&params.id, params.enabled)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        "reorderProfiles" => {
            let params: ReorderParams = parse(params)?;
            reply(
                service
                    .reorder_profiles(&params.ordered_ids)
                    .await
                    .map_err(|e| e.to_string())?,
            )
        }
        other => Err(format!("unknown method: {other}")),
    }
}
