//! Server records and the score documents agents publish

use crate::Role;
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a server within one role ("place")
pub type ServerId = String;

/// Peers of one role, ascending by measured latency
pub type Ranking = Vec<ServerId>;

/// One participant in the mesh, with its latency rankings per role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    #[serde(rename = "serverType")]
    pub role: Role,
    pub place: ServerId,
    pub ip: String,
    #[serde(rename = "relMedias", default, deserialize_with = "null_as_empty")]
    pub rel_medias: Ranking,
    #[serde(rename = "relNodes", default, deserialize_with = "null_as_empty")]
    pub rel_nodes: Ranking,
    #[serde(rename = "relChats", default, deserialize_with = "null_as_empty")]
    pub rel_chats: Ranking,
}

impl ServerRecord {
    /// Create a record with empty rankings
    pub fn new(role: Role, place: impl Into<ServerId>, ip: impl Into<String>) -> Self {
        Self {
            role,
            place: place.into(),
            ip: ip.into(),
            rel_medias: Vec::new(),
            rel_nodes: Vec::new(),
            rel_chats: Vec::new(),
        }
    }

    /// Current ranking of peers in `role` as seen from this server
    pub fn ranking(&self, role: Role) -> &[ServerId] {
        match role {
            Role::Node => &self.rel_nodes,
            Role::Chat => &self.rel_chats,
            Role::Media => &self.rel_medias,
        }
    }

    pub fn set_ranking(&mut self, role: Role, ranking: Ranking) {
        match role {
            Role::Node => self.rel_nodes = ranking,
            Role::Chat => self.rel_chats = ranking,
            Role::Media => self.rel_medias = ranking,
        }
    }

    /// The score document published on `/route-scores`
    pub fn scores(&self) -> Scores {
        Scores {
            media_places: self.rel_medias.clone(),
            node_places: self.rel_nodes.clone(),
            chat_places: self.rel_chats.clone(),
        }
    }

    /// Overwrite every ranking from a score document, leaving identity untouched
    pub fn apply_scores(&mut self, scores: Scores) {
        self.rel_medias = scores.media_places;
        self.rel_nodes = scores.node_places;
        self.rel_chats = scores.chat_places;
    }
}

/// Rankings of one server for every role
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    #[serde(rename = "mediaPlaces", default, deserialize_with = "null_as_empty")]
    pub media_places: Ranking,
    #[serde(rename = "nodePlaces", default, deserialize_with = "null_as_empty")]
    pub node_places: Ranking,
    #[serde(rename = "chatPlaces", default, deserialize_with = "null_as_empty")]
    pub chat_places: Ranking,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Ranking, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Ranking>::deserialize(deserializer)?.unwrap_or_default())
}
