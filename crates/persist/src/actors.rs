use crate::key::SessionKey;
use crate::store::{RecordError, write_json};
use fogwar_common::ActorId;
use fogwar_kernel::ActorRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActorFile {
    #[serde(default)]
    actors: Vec<String>,
}

/// Tracked actor ids per session, as `<stem>_actors.json`.
pub struct ActorStore {
    root: PathBuf,
}

impl ActorStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, key: &SessionKey) -> PathBuf {
        self.root.join(format!("{}_actors.json", key.stem()))
    }

    pub fn save(&self, key: &SessionKey, registry: &ActorRegistry) -> Result<usize, RecordError> {
        std::fs::create_dir_all(&self.root)?;
        let file = ActorFile {
            actors: registry.ids().iter().map(ToString::to_string).collect(),
        };
        write_json(&self.path(key), &file)?;
        tracing::debug!(%key, actors = file.actors.len(), "actor ids saved");
        Ok(file.actors.len())
    }

    /// Replace the registry membership with the saved ids.
    ///
    /// A missing file loads nothing. Ids that do not parse are skipped.
    pub fn load(&self, key: &SessionKey, registry: &ActorRegistry) -> Result<usize, RecordError> {
        let bytes = match std::fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                registry.clear();
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        let file: ActorFile = serde_json::from_slice(&bytes)?;
        let ids: Vec<ActorId> = file
            .actors
            .iter()
            .filter_map(|raw| match ActorId::parse(raw) {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::warn!(%key, id = %raw, error = %err, "skipping unparsable actor id");
                    None
                }
            })
            .collect();
        let count = ids.len();
        registry.replace(ids);
        tracing::debug!(%key, actors = count, "actor ids loaded");
        Ok(count)
    }
}
