use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("Playlist must contain at least one track")]
    Empty,
}

/// Fixed, ordered list of track URIs shared by every context through
/// static configuration. Never part of the synchronized state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    tracks: Vec<String>,
}

impl Playlist {
    pub fn new<I, S>(tracks: I) -> Result<Self, PlaylistError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tracks: Vec<String> = tracks.into_iter().map(Into::into).collect();
        if tracks.is_empty() {
            return Err(PlaylistError::Empty);
        }
        Ok(Self { tracks })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Always false, construction rejects empty playlists
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.tracks.get(index).map(String::as_str)
    }

    pub fn contains_index(&self, index: usize) -> bool {
        index < self.tracks.len()
    }

    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.tracks.len()
    }

    pub fn previous_index(&self, index: usize) -> usize {
        if index == 0 {
            self.tracks.len() - 1
        } else {
            index - 1
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(String::as_str)
    }
}
