//! ffconcat playlists that loop forever.
//!
//! The last entry points back at the playlist itself, so the concat demuxer
//! re-opens it after each pass and picks up a replaced video without the
//! reader being restarted.

pub fn video_file_name(stream_path: &str) -> String {
    format!("{stream_path}_loop.mp4")
}

pub fn playlist_file_name(stream_path: &str) -> String {
    format!("{stream_path}.playlist")
}

/// Deterministic for a given stream path.
pub fn render_playlist(stream_path: &str) -> String {
    format!(
        "ffconcat version 1.0\nfile '{}'\nfile '{}'\n",
        escape(&video_file_name(stream_path)),
        escape(&playlist_file_name(stream_path)),
    )
}

/// ffconcat quoting: close the quote, emit an escaped quote, reopen.
fn escape(name: &str) -> String {
    name.replace('\'', r"'\''")
}
