use crate::error::{ReflacError, Result};
use crate::tags::{load_cover, TagField, TagWriter, TrackTags};
use crate::trackinfo::{AlbumInfo, Track};
use lofty::picture::Picture;
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "m4a", "ogg", "opus", "aac", "wav"];

/// Windows/FAT32 reserved device names that are invalid as filenames.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a tag value for use as a file or folder name.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars() {
        match c {
            '/' | '\\' => out.push('_'),
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => {}
            c if c.is_control() => {}
            _ => out.push(c),
        }
    }

    let collapsed: String = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');

    if trimmed.is_empty() {
        return "Unknown".to_string();
    }

    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(trimmed))
    {
        return format!("_{}", trimmed);
    }

    trimmed.to_string()
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Audio files directly inside `dir`, sorted by file name.
pub fn scan_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::metadata(dir).map_err(|e| ReflacError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(ReflacError::io(
            dir,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            ReflacError::io(path, e.into())
        })?;
        if entry.file_type().is_file()
            && is_audio_file(entry.path())
            && !is_hidden(entry.file_name())
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn files_before_dirs(a: &DirEntry, b: &DirEntry) -> std::cmp::Ordering {
    (a.file_type().is_dir(), a.file_name()).cmp(&(b.file_type().is_dir(), b.file_name()))
}

/// Audio files of the album stored under `dir`.
///
/// These are the files directly inside `dir`. If it has none, they come from
/// the first directory below it that does, searching subdirectories in name
/// order, depth first.
pub fn find_audio(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = scan_files(dir)?;
    if !files.is_empty() {
        return Ok(files);
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by(files_before_dirs)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => continue,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                return Err(ReflacError::io(path, e.into()));
            }
        };
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            let found = entry.path().parent().unwrap_or(dir);
            debug!("no audio in {}, using {}", dir.display(), found.display());
            return scan_files(found);
        }
    }
    Ok(Vec::new())
}

/// Where tagged files go.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Write tagged copies below this directory instead of tagging in place.
    pub output_dir: Option<PathBuf>,
    /// Keep source file names for copies instead of `NN. Artist - Title.ext`.
    pub keep_names: bool,
}

/// One source file and everything that will be written for it.
#[derive(Debug)]
pub struct PlannedTrack {
    pub number: u32,
    pub source: PathBuf,
    pub target: PathBuf,
    pub tags: TrackTags,
    pub cover: Option<PathBuf>,
}

impl PlannedTrack {
    pub fn title(&self) -> &str {
        self.tags
            .iter()
            .find(|(field, _)| *field == TagField::Title)
            .map_or("", |(_, value)| value.as_str())
    }

    pub fn in_place(&self) -> bool {
        same_file(&self.source, &self.target)
    }
}

/// A fully validated tagging run. Building one touches nothing on disk.
#[derive(Debug)]
pub struct Plan {
    pub tracks: Vec<PlannedTrack>,
    covers: BTreeMap<PathBuf, Picture>,
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || matches!((fs::canonicalize(a), fs::canonicalize(b)), (Ok(x), Ok(y)) if x == y)
}

/// Absolute form of `path`, which need not exist yet.
///
/// The longest existing prefix is canonicalized. The rest does not exist, so
/// it holds no symlinks and `..` is applied lexically.
fn resolve_path(path: &Path) -> PathBuf {
    for base in path.ancestors() {
        let existing = if base.as_os_str().is_empty() {
            Path::new(".")
        } else {
            base
        };
        let Ok(mut resolved) = fs::canonicalize(existing) else {
            continue;
        };
        let rest = path.strip_prefix(base).unwrap_or(Path::new(""));
        for part in rest.components() {
            match part {
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                other => resolved.push(other),
            }
        }
        return resolved;
    }
    path.to_path_buf()
}

fn overwrite_error(target: &Path, reason: &str) -> ReflacError {
    ReflacError::io(
        target,
        io::Error::new(io::ErrorKind::AlreadyExists, reason.to_string()),
    )
}

/// Pair each track with its source file.
///
/// Tracks sharing an input directory take that directory's audio files in
/// file name order. Every directory must hold exactly as many files as it
/// has tracks.
fn match_sources(album: &AlbumInfo) -> Result<Vec<(PathBuf, Track<'_>)>> {
    let mut groups: Vec<(&Path, Vec<Track<'_>>)> = Vec::new();
    for track in album.tracks() {
        match groups.iter_mut().find(|(dir, _)| *dir == track.input_dir) {
            Some((_, tracks)) => tracks.push(track),
            None => groups.push((track.input_dir, vec![track])),
        }
    }

    let mut matched = Vec::with_capacity(album.titles.len());
    for (dir, tracks) in groups {
        let files = find_audio(dir)?;
        if files.len() != tracks.len() {
            return Err(ReflacError::CountMismatch {
                dir: dir.to_path_buf(),
                files: files.len(),
                titles: tracks.len(),
            });
        }
        matched.extend(files.into_iter().zip(tracks));
    }
    matched.sort_by_key(|(_, track)| track.number);
    Ok(matched)
}

fn track_tags(track: &Track<'_>) -> TrackTags {
    let fields = &track.fields;
    let mut tags = TrackTags::new();
    let mut push = |field: TagField, value: Option<String>| {
        if let Some(value) = value {
            tags.push((field, value));
        }
    };

    push(TagField::Album, fields.album.clone());
    push(TagField::Artist, fields.artist.clone());
    push(TagField::Genre, fields.genre.clone());
    push(
        TagField::Date,
        fields.date.map(|d| d.format("%Y-%m-%d").to_string()),
    );
    push(TagField::Lyricist, fields.lyricist.clone());
    push(TagField::Composer, fields.composer.clone());
    push(TagField::Arranger, fields.arranger.clone());
    push(TagField::Label, fields.label.clone());
    push(TagField::Comment, fields.comment.clone());
    push(TagField::TrackNumber, Some(track.number.to_string()));
    push(TagField::DiscNumber, fields.disc.map(|d| d.to_string()));
    push(TagField::Title, Some(track.title.to_string()));
    tags
}

/// The album most tracks belong to; ties go to the earliest track.
fn album_folder(album: &AlbumInfo) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for track in album.tracks() {
        let Some(name) = track.fields.album else {
            continue;
        };
        match counts.iter_mut().find(|(seen, _)| *seen == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }

    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(name, _)| sanitize(&name))
}

fn numbered_name(track: &Track<'_>, source: &Path, width: usize) -> String {
    let ext = source
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("flac");
    let number = format!("{:0width$}", track.number, width = width);
    let artist = track.fields.artist.as_deref().filter(|a| !a.is_empty());
    let title = Some(track.title).filter(|t| !t.is_empty());

    match (artist, title) {
        (Some(artist), Some(title)) => {
            format!("{}. {} - {}.{}", number, sanitize(artist), sanitize(title), ext)
        }
        (Some(name), None) | (None, Some(name)) => {
            format!("{}. {}.{}", number, sanitize(name), ext)
        }
        (None, None) => format!("{}.{}", number, ext),
    }
}

/// Validate a run and work out every write it will make.
///
/// Fails before anything is written when an input directory holds a
/// different number of audio files than it has titles, a cover cannot be
/// loaded, a source file cannot be read by `writer`, or a copy would
/// overwrite an input or another copy.
pub fn plan(album: &AlbumInfo, options: &ApplyOptions, writer: &impl TagWriter) -> Result<Plan> {
    let matched = match_sources(album)?;

    let mut covers = BTreeMap::new();
    for (_, track) in &matched {
        if let Some(path) = &track.fields.cover {
            if !covers.contains_key(path) {
                debug!("loading cover {}", path.display());
                let picture = load_cover(path)?;
                covers.insert(path.clone(), picture);
            }
        }
    }

    let mut sources = HashSet::new();
    for (file, _) in &matched {
        writer.check(file)?;
        sources.insert(fs::canonicalize(file).map_err(|e| ReflacError::io(file, e))?);
    }

    let width = album
        .titles
        .keys()
        .next_back()
        .map_or(1, |n| n.to_string().len());
    let folder = album_folder(album);
    let mut targets = HashSet::new();

    let mut tracks = Vec::with_capacity(matched.len());
    for (source, track) in matched {
        let target = match &options.output_dir {
            None => source.clone(),
            Some(out) => {
                let mut dir = out.clone();
                if let Some(folder) = &folder {
                    dir.push(folder);
                }
                if let Some(disc) = track.fields.disc {
                    dir.push(format!("Disc {}", disc));
                }
                let name = if options.keep_names {
                    source.file_name().map(PathBuf::from).unwrap_or_default()
                } else {
                    PathBuf::from(numbered_name(&track, &source, width))
                };
                dir.join(name)
            }
        };

        let resolved = resolve_path(&target);
        if !targets.insert(resolved.clone()) {
            return Err(overwrite_error(&target, "two tracks would be written to the same file"));
        }
        if sources.contains(&resolved) && !same_file(&source, &target) {
            return Err(overwrite_error(&target, "output would overwrite another input file"));
        }

        tracks.push(PlannedTrack {
            number: track.number,
            tags: track_tags(&track),
            cover: track.fields.cover.clone(),
            source,
            target,
        });
    }

    Ok(Plan { tracks, covers })
}

impl Plan {
    /// Copy `track` into place if needed and write its tags.
    pub fn write_track(&self, track: &PlannedTrack, writer: &mut impl TagWriter) -> Result<()> {
        if !track.in_place() {
            if let Some(parent) = track.target.parent() {
                fs::create_dir_all(parent).map_err(|e| ReflacError::io(parent, e))?;
            }
            fs::copy(&track.source, &track.target)
                .map_err(|e| ReflacError::io(&track.target, e))?;
        }

        let cover = track.cover.as_ref().and_then(|path| self.covers.get(path));
        writer.write(&track.target, &track.tags, cover)
    }

    pub fn cover_count(&self) -> usize {
        self.covers.len()
    }
}

/// Plan and execute a whole run.
pub fn apply(album: &AlbumInfo, options: &ApplyOptions, writer: &mut impl TagWriter) -> Result<Plan> {
    let plan = plan(album, options, &*writer)?;
    for track in &plan.tracks {
        plan.write_track(track, &mut *writer)?;
    }
    Ok(plan)
}
