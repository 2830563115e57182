//! Line-oriented m3u8 handling.
//!
//! Uploaded playlists must only reference segments by bare relative name,
//! because segments are stored next to the playlist under one object prefix.

use crate::core::error::{VodError, VodResult};
use crate::utils::path::{get_file_name, replace_file_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistLine {
    /// Tag or comment, starts with `#`.
    Comment(String),
    Blank,
    /// Segment reference: relative name, absolute path or URL.
    Segment(String),
}

/// A segment to upload: where to read it from and the name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub source: String,
    pub name: String,
}

impl Slice {
    pub fn from_source(source: &str) -> Self {
        let (_, name) = get_file_name(source);
        Self {
            source: source.to_string(),
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Playlist {
    lines: Vec<PlaylistLine>,
}

impl Playlist {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| {
                let line = raw.trim();
                if line.is_empty() {
                    PlaylistLine::Blank
                } else if line.starts_with('#') {
                    PlaylistLine::Comment(line.to_string())
                } else {
                    PlaylistLine::Segment(line.to_string())
                }
            })
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[PlaylistLine] {
        &self.lines
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            PlaylistLine::Segment(segment) => Some(segment.as_str()),
            _ => None,
        })
    }

    /// Comments pass through, segments become bare file names, blank lines
    /// are dropped. Every emitted line ends with `\n`.
    pub fn rewrite(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            match line {
                PlaylistLine::Comment(comment) => {
                    text.push_str(comment);
                    text.push('\n');
                }
                PlaylistLine::Segment(segment) => {
                    let (_, name) = get_file_name(segment);
                    text.push_str(&name);
                    text.push('\n');
                }
                PlaylistLine::Blank => {}
            }
        }
        text
    }

    /// Resolves each segment against the directory of `playlist_path`, in
    /// playlist order.
    pub fn segment_sources(&self, playlist_path: &str) -> VodResult<Vec<String>> {
        self.segments()
            .map(|segment| {
                replace_file_name(playlist_path, segment).ok_or_else(|| {
                    VodError::InvalidM3u8(format!(
                        "cannot resolve segment {} against {}",
                        segment, playlist_path
                    ))
                })
            })
            .collect()
    }
}
