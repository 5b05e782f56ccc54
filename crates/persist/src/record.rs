use crate::RecordError;
use fogwar_common::{FogAppearance, TilePosition, VisibilityState};
use fogwar_kernel::{Snapshot, StorePolicy, TileEntry, VisibilityStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Current record schema.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub x: i32,
    pub z: i32,
    pub state: VisibilityState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub x: i32,
    pub z: i32,
    pub appearance: FogAppearance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub x: i32,
    pub z: i32,
    /// Snapshot byte form.
    pub bytes: Vec<u8>,
}

/// Everything the content hash covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBody {
    pub schema_version: u32,
    pub default_state: VisibilityState,
    pub states: Vec<StateRecord>,
    pub overrides: Vec<OverrideRecord>,
    pub snapshots: Vec<SnapshotRecord>,
}

/// Persisted visibility of one session.
///
/// The hash is SHA-256 over the CBOR form of the body, so a record that
/// decodes but was altered is still rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogRecord {
    pub body: RecordBody,
    pub hash: String,
}

/// Counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub tiles: usize,
    pub fogged: usize,
    pub hidden: usize,
    pub visible: usize,
    pub overrides: usize,
    pub snapshots: usize,
    pub snapshot_bytes: usize,
}

impl FogRecord {
    /// Copy the current contents of `store`.
    ///
    /// Overrides equal to the process default are left out.
    pub fn capture(store: &VisibilityStore) -> Result<Self, RecordError> {
        let default_appearance = store.default_appearance();
        let mut body = RecordBody {
            schema_version: RECORD_SCHEMA_VERSION,
            default_state: store.policy().default_state(),
            states: Vec::new(),
            overrides: Vec::new(),
            snapshots: Vec::new(),
        };
        for entry in store.entries() {
            let TilePosition { x, z } = entry.pos;
            body.states.push(StateRecord {
                x,
                z,
                state: entry.state,
            });
            if let Some(appearance) = entry.appearance.filter(|a| *a != default_appearance) {
                body.overrides.push(OverrideRecord { x, z, appearance });
            }
            if let Some(snapshot) = entry.snapshot {
                body.snapshots.push(SnapshotRecord {
                    x,
                    z,
                    bytes: snapshot.encode(),
                });
            }
        }
        let hash = body_hash(&body)?;
        Ok(Self { body, hash })
    }

    pub fn verify(&self) -> Result<(), RecordError> {
        let actual = body_hash(&self.body)?;
        if actual != self.hash {
            return Err(RecordError::IntegrityMismatch {
                expected: self.hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Validate against `policy` and rebuild store entries.
    pub fn to_entries(&self, policy: StorePolicy) -> Result<Vec<TileEntry>, RecordError> {
        let body = &self.body;
        if body.schema_version != RECORD_SCHEMA_VERSION {
            return Err(RecordError::SchemaMismatch {
                file_version: body.schema_version,
                expected_version: RECORD_SCHEMA_VERSION,
            });
        }
        if body.default_state != policy.default_state() {
            return Err(RecordError::PolicyMismatch {
                record: body.default_state,
                store: policy.default_state(),
            });
        }

        let mut entries: BTreeMap<TilePosition, TileEntry> = BTreeMap::new();
        for StateRecord { x, z, state } in &body.states {
            let pos = TilePosition::new(*x, *z);
            let entry = TileEntry {
                pos,
                state: *state,
                appearance: None,
                snapshot: None,
            };
            if entries.insert(pos, entry).is_some() {
                return Err(fogwar_kernel::EntryError::Duplicate(pos).into());
            }
        }

        let mut overrides: HashMap<TilePosition, &FogAppearance> = HashMap::new();
        for OverrideRecord { x, z, appearance } in &body.overrides {
            overrides.insert(TilePosition::new(*x, *z), appearance);
        }
        for (pos, appearance) in overrides {
            match entries.get_mut(&pos) {
                Some(entry) => entry.appearance = Some(appearance.clone()),
                None => return Err(RecordError::Orphan { pos, kind: "override" }),
            }
        }

        for SnapshotRecord { x, z, bytes } in &body.snapshots {
            let pos = TilePosition::new(*x, *z);
            let snapshot =
                Snapshot::decode(bytes).map_err(|source| RecordError::Snapshot { pos, source })?;
            match entries.get_mut(&pos) {
                Some(entry) => entry.snapshot = Some(Arc::new(snapshot)),
                None => return Err(RecordError::Orphan { pos, kind: "snapshot" }),
            }
        }

        let entries: Vec<TileEntry> = entries.into_values().collect();
        for entry in &entries {
            entry.validate(policy)?;
        }
        Ok(entries)
    }

    pub fn summary(&self) -> RecordSummary {
        let body = &self.body;
        let mut summary = RecordSummary {
            tiles: body.states.len(),
            overrides: body.overrides.len(),
            snapshots: body.snapshots.len(),
            snapshot_bytes: body.snapshots.iter().map(|s| s.bytes.len()).sum(),
            ..RecordSummary::default()
        };
        for record in &body.states {
            match record.state {
                VisibilityState::Fogged => summary.fogged += 1,
                VisibilityState::Hidden => summary.hidden += 1,
                VisibilityState::Visible => summary.visible += 1,
            }
        }
        summary
    }
}

fn body_hash(body: &RecordBody) -> Result<String, RecordError> {
    let bytes = crate::store::cbor_serialize(body)?;
    Ok(crate::store::sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogwar_common::HeightBounds;
    use fogwar_kernel::{LayeredWorld, TileUpdate};

    fn populated() -> VisibilityStore {
        let store = VisibilityStore::default();
        store.attach_world(Arc::new(LayeredWorld::new(HeightBounds::new(-16, 32), 0, 4)));
        store.set_state(TilePosition::new(0, 0), VisibilityState::Fogged);
        store.apply_update(
            TileUpdate::new(TilePosition::new(1, -3), VisibilityState::Fogged)
                .with_appearance(FogAppearance::parse("stone").unwrap()),
        );
        store.set_state(TilePosition::new(-4, 2), VisibilityState::Hidden);
        store
    }

    #[test]
    fn capture_and_verify() {
        let record = FogRecord::capture(&populated()).unwrap();
        record.verify().unwrap();
        let summary = record.summary();
        assert_eq!(summary.tiles, 3);
        assert_eq!(summary.fogged, 2);
        assert_eq!(summary.hidden, 1);
        assert_eq!(summary.overrides, 1);
        assert_eq!(summary.snapshots, 2);
    }

    #[test]
    fn tampered_body_fails_verification() {
        let mut record = FogRecord::capture(&populated()).unwrap();
        record.body.states[0].state = VisibilityState::Hidden;
        assert!(matches!(record.verify(), Err(RecordError::IntegrityMismatch { .. })));
    }

    #[test]
    fn entries_restore_byte_identical_snapshots() {
        let store = populated();
        let record = FogRecord::capture(&store).unwrap();
        let entries = record.to_entries(store.policy()).unwrap();
        assert_eq!(entries, store.entries());
    }

    #[test]
    fn overrides_matching_default_are_dropped() {
        let store = populated();
        store.set_default_appearance(FogAppearance::parse("stone").unwrap());
        let record = FogRecord::capture(&store).unwrap();
        assert!(record.body.overrides.is_empty());
    }

    #[test]
    fn invalid_records_are_rejected() {
        let store = populated();
        let policy = store.policy();

        let mut record = FogRecord::capture(&store).unwrap();
        record.body.schema_version = 99;
        assert!(matches!(record.to_entries(policy), Err(RecordError::SchemaMismatch { .. })));

        let mut record = FogRecord::capture(&store).unwrap();
        record.body.states.retain(|s| s.state != VisibilityState::Fogged);
        assert!(matches!(record.to_entries(policy), Err(RecordError::Orphan { .. })));

        let mut record = FogRecord::capture(&store).unwrap();
        record.body.states.push(StateRecord {
            x: 50,
            z: 50,
            state: VisibilityState::Visible,
        });
        assert!(matches!(record.to_entries(policy), Err(RecordError::InvalidEntry(_))));

        let mut record = FogRecord::capture(&store).unwrap();
        record.body.snapshots[0].bytes.truncate(5);
        assert!(matches!(record.to_entries(policy), Err(RecordError::Snapshot { .. })));

        let hidden = StorePolicy::new(VisibilityState::Hidden).unwrap();
        let record = FogRecord::capture(&store).unwrap();
        assert!(matches!(record.to_entries(hidden), Err(RecordError::PolicyMismatch { .. })));
    }
}
