use crate::error::{MatchError, MatchResult};
use crate::types::{Player, PlayerId, PlayerInfo};

/// Players currently seated in the match, in join order.
///
/// Ids and display names are unique among current members; a name frees up
/// again once its player leaves.
#[derive(Debug, Default)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, player: Player) -> MatchResult<()> {
        if self.contains(&player.id) {
            return Err(MatchError::DuplicatePlayer(player.id));
        }
        if self.name_taken(&player.display_name) {
            return Err(MatchError::DuplicateName(player.display_name));
        }
        self.players.push(player);
        Ok(())
    }

    pub fn remove(&mut self, player_id: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == player_id)?;
        Some(self.players.remove(index))
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn name_taken(&self, display_name: &str) -> bool {
        self.players.iter().any(|p| p.display_name == display_name)
    }

    pub fn get_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    pub fn infos(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }
}
