//! Test support: fake server binaries and a scripted admin client.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::client::{AdminClient, ConnectionTarget, command_name};
use crate::{Error, Result};

/// Prints an options line, the build banner and a "listening" line, then
/// sleeps. The port is the `--port` argument, or derived from the pid when
/// it is `0`.
const FAKE_SERVER: &str = r#"
echo "2024-01-01T00:00:00.000+0000 I CONTROL  [initandlisten] options: $*"
port=0
while [ $# -gt 0 ]; do
  case "$1" in
    --port) port="$2"; shift ;;
    --port=*) port="${1#--port=}" ;;
  esac
  shift
done
if [ "$port" = "0" ]; then port=$(( 20000 + $$ % 30000 )); fi
echo '{"t":{"$date":"2024-01-01T00:00:00.000+00:00"},"s":"I","c":"CONTROL","id":23403,"ctx":"initandlisten","msg":"Build Info","attr":{"buildInfo":{"version":"7.0.2","modules":[]}}}'
echo "{\"t\":{\"\$date\":\"2024-01-01T00:00:00.000+00:00\"},\"s\":\"I\",\"c\":\"NETWORK\",\"id\":23016,\"ctx\":\"listener\",\"msg\":\"Waiting for connections\",\"attr\":{\"port\":$port,\"ssl\":\"off\"}}"
exec sleep 600
"#;

/// Writes an executable `/bin/sh` script.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// Directory holding fake `mongod` and `mongos`, shared by all tests.
pub(crate) fn fake_bin_dir() -> PathBuf {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().expect("create fake bin dir");
        write_script(dir.path(), "mongod", FAKE_SERVER);
        write_script(dir.path(), "mongos", FAKE_SERVER);
        dir
    })
    .path()
    .to_path_buf()
}

/// In-memory [`AdminClient`] answering the commands orchestration issues.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    calls: Mutex<Vec<(String, Value)>>,
    initiated: Mutex<HashMap<String, String>>,
    fail_build_info: AtomicBool,
    never_primary: AtomicBool,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every `buildInfo` fail, as if nothing were listening.
    pub(crate) fn fail_build_info(&self) {
        self.fail_build_info.store(true, Ordering::SeqCst);
    }

    /// Makes `replSetGetStatus` never report a primary.
    pub(crate) fn never_elect(&self) {
        self.never_primary.store(true, Ordering::SeqCst);
    }

    /// `(uri, command)` pairs for commands named `name`, in call order.
    pub(crate) fn calls_named(&self, name: &str) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(_, command)| command_name(command) == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AdminClient for ScriptedClient {
    async fn run_command(&self, target: &ConnectionTarget, command: Value) -> Result<Value> {
        let name = command_name(&command);
        let uri = target.uri();
        self.calls
            .lock()
            .expect("calls lock")
            .push((uri.clone(), command.clone()));

        match name.as_str() {
            "buildInfo" if self.fail_build_info.load(Ordering::SeqCst) => Err(Error::Command {
                command: name,
                target: target.redacted(),
                reason: "connection refused".to_string(),
            }),
            "buildInfo" => Ok(json!({"version": "7.0.2", "modules": [], "ok": 1})),
            "replSetInitiate" => {
                let set = command["replSetInitiate"]["_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.initiated.lock().expect("initiated lock").insert(uri, set);
                Ok(json!({"ok": 1}))
            }
            "replSetGetStatus" => {
                let set = self.initiated.lock().expect("initiated lock").get(&uri).cloned();
                match set {
                    None => Ok(json!({"ok": 0, "errmsg": "no replset config has been received"})),
                    Some(set) => {
                        let state = if self.never_primary.load(Ordering::SeqCst) {
                            "SECONDARY"
                        } else {
                            "PRIMARY"
                        };
                        Ok(json!({"set": set, "members": [{"_id": 0, "stateStr": state}], "ok": 1}))
                    }
                }
            }
            _ => Ok(json!({"ok": 1})),
        }
    }
}
