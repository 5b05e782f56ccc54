use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one persisted session: a world joined by a player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub world_id: String,
    pub player_name: String,
}

impl SessionKey {
    pub fn new(world_id: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            player_name: player_name.into(),
        }
    }

    /// File-name-safe stem: `<world>_<player>`.
    ///
    /// Stems are not unique. `("a_b", "c")` and `("a", "b_c")` both give
    /// `a_b_c`, as do keys differing only in replaced characters, and such
    /// keys share one record file.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.world_id, self.player_name)
            .chars()
            .map(|c| match c {
                'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
                _ => '_',
            })
            .collect()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.world_id, self.player_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_replaces_unsafe_characters() {
        let key = SessionKey::new("play.example.net:25565", "Steve");
        assert_eq!(key.stem(), "play.example.net_25565_Steve");
        assert_eq!(SessionKey::new("a/b", "c d").stem(), "a_b_c_d");
        assert_eq!(SessionKey::new("wörld", "x").stem(), "w_rld_x");
    }

    #[test]
    fn distinct_keys_can_share_a_stem() {
        let left = SessionKey::new("a_b", "c");
        let right = SessionKey::new("a", "b_c");
        assert_ne!(left, right);
        assert_eq!(left.stem(), "a_b_c");
        assert_eq!(left.stem(), right.stem());
        assert_eq!(SessionKey::new("a b", "c").stem(), left.stem());
    }
}
