//! TRACKINFO parsing.
//!
//! A TRACKINFO file is a list of `KEY=VALUE` / `KEY[N]=VALUE` assignments
//! describing one album. Unindexed keys apply to every track, indexed keys
//! apply to track `N` only.

use crate::error::{ReflacError, Result};
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Tag values that can be given album-wide or per track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFields {
    pub album: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub date: Option<NaiveDate>,
    pub cover: Option<PathBuf>,
    pub lyricist: Option<String>,
    pub composer: Option<String>,
    pub arranger: Option<String>,
    pub label: Option<String>,
    pub comment: Option<String>,
    pub disc: Option<u32>,
}

impl TrackFields {
    /// Values set in `self`, falling back to `base` for the rest.
    pub fn or(&self, base: &TrackFields) -> TrackFields {
        fn pick<T: Clone>(own: &Option<T>, base: &Option<T>) -> Option<T> {
            own.as_ref().or(base.as_ref()).cloned()
        }

        TrackFields {
            album: pick(&self.album, &base.album),
            artist: pick(&self.artist, &base.artist),
            genre: pick(&self.genre, &base.genre),
            date: pick(&self.date, &base.date),
            cover: pick(&self.cover, &base.cover),
            lyricist: pick(&self.lyricist, &base.lyricist),
            composer: pick(&self.composer, &base.composer),
            arranger: pick(&self.arranger, &base.arranger),
            label: pick(&self.label, &base.label),
            comment: pick(&self.comment, &base.comment),
            disc: pick(&self.disc, &base.disc),
        }
    }
}

/// Everything a TRACKINFO file says about an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumInfo {
    pub shared: TrackFields,
    /// Track titles keyed by track number, ascending.
    pub titles: BTreeMap<u32, String>,
    /// Source directory of each track. Same keys as `titles`.
    pub inputs: BTreeMap<u32, PathBuf>,
    /// Per-track values that win over `shared`. COVER paths are still
    /// relative here; [`AlbumInfo::tracks`] resolves them.
    pub overrides: BTreeMap<u32, TrackFields>,
}

/// One track with its fields fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track<'a> {
    pub number: u32,
    pub title: &'a str,
    pub input_dir: &'a Path,
    pub fields: TrackFields,
}

impl AlbumInfo {
    /// Tracks in album order.
    pub fn tracks(&self) -> impl Iterator<Item = Track<'_>> + '_ {
        self.titles
            .iter()
            .zip(self.inputs.values())
            .map(move |((&number, title), input_dir)| {
                let mut fields = match self.overrides.get(&number) {
                    Some(own) => own.or(&self.shared),
                    None => self.shared.clone(),
                };
                if let Some(cover) = fields.cover.take() {
                    fields.cover = Some(input_dir.join(cover));
                }
                Track {
                    number,
                    title,
                    input_dir,
                    fields,
                }
            })
    }

    /// Distinct source directories, in order of first use.
    pub fn input_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for dir in self.inputs.values() {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Input,
    Title,
    Album,
    Artist,
    Genre,
    Date,
    Cover,
    Lyricist,
    Composer,
    Arranger,
    Label,
    Comment,
    Disc,
}

impl Key {
    fn from_name(name: &str) -> Option<Key> {
        let key = match name {
            "INPUT" => Key::Input,
            "TITLE" => Key::Title,
            "ALBUM" => Key::Album,
            "ARTIST" => Key::Artist,
            "GENRE" => Key::Genre,
            "DATE" => Key::Date,
            "COVER" => Key::Cover,
            "LYRICIST" => Key::Lyricist,
            "COMPOSER" => Key::Composer,
            "ARRANGER" => Key::Arranger,
            "LABEL" => Key::Label,
            "COMMENT" => Key::Comment,
            "DISC" => Key::Disc,
            _ => return None,
        };
        Some(key)
    }
}

enum Line<'a> {
    Blank,
    Assignment {
        key: &'a str,
        index: Option<u32>,
        value: &'a str,
    },
}

fn split_line(line_no: usize, line: &str) -> Result<Line<'_>> {
    let content = line.trim_start();
    if content.is_empty() || content.starts_with('#') {
        return Ok(Line::Blank);
    }

    let (lhs, value) = line
        .split_once('=')
        .ok_or_else(|| ReflacError::parse(line_no, "expected KEY=VALUE"))?;
    let lhs = lhs.trim();

    let (key, index) = match lhs.split_once('[') {
        Some((key, rest)) => {
            let digits = rest
                .strip_suffix(']')
                .ok_or_else(|| ReflacError::parse(line_no, "unterminated track index"))?;
            let index = digits
                .parse::<u32>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    ReflacError::parse(line_no, format!("invalid track index `{digits}`"))
                })?;
            (key, Some(index))
        }
        None => (lhs, None),
    };

    if key.is_empty() {
        return Err(ReflacError::parse(line_no, "empty key"));
    }

    Ok(Line::Assignment { key, index, value })
}

fn parse_date(line_no: usize, value: &str) -> Result<NaiveDate> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-';
    shaped
        .then(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
        .flatten()
        .ok_or_else(|| {
            ReflacError::parse(line_no, format!("DATE `{value}` is not a YYYY-MM-DD date"))
        })
}

fn set_field(fields: &mut TrackFields, key: Key, value: &str, line_no: usize) -> Result<()> {
    // An empty value leaves the field unset.
    let text = (!value.is_empty()).then(|| value.to_string());

    match key {
        Key::Album => fields.album = text,
        Key::Artist => fields.artist = text,
        Key::Genre => fields.genre = text,
        Key::Lyricist => fields.lyricist = text,
        Key::Composer => fields.composer = text,
        Key::Arranger => fields.arranger = text,
        Key::Label => fields.label = text,
        Key::Comment => fields.comment = text,
        Key::Cover => fields.cover = text.map(PathBuf::from),
        Key::Date => fields.date = text.map(|v| parse_date(line_no, &v)).transpose()?,
        Key::Disc => {
            fields.disc = text
                .map(|v| {
                    v.parse::<u32>().ok().filter(|&n| n > 0).ok_or_else(|| {
                        ReflacError::parse(line_no, format!("DISC `{v}` is not a positive number"))
                    })
                })
                .transpose()?
        }
        // Not per-track fields; handled by the caller.
        Key::Input | Key::Title => {}
    }
    Ok(())
}

/// Read and parse the TRACKINFO file at `path`.
///
/// A relative INPUT is taken relative to the directory containing `path`.
pub fn parse_file(path: &Path) -> Result<AlbumInfo> {
    let text = fs::read_to_string(path).map_err(|e| ReflacError::io(path, e))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    parse_str(&text, base_dir)
}

/// Parse TRACKINFO text, resolving relative INPUT paths against `base_dir`.
///
/// Each track needs a TITLE and a source directory, given either by the
/// album-wide INPUT or by its own `INPUT[N]`.
pub fn parse_str(text: &str, base_dir: &Path) -> Result<AlbumInfo> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut input: Option<PathBuf> = None;
    let mut track_inputs: BTreeMap<u32, PathBuf> = BTreeMap::new();
    let mut shared = TrackFields::default();
    let mut titles = BTreeMap::new();
    let mut overrides: BTreeMap<u32, TrackFields> = BTreeMap::new();
    let mut first_override_line: BTreeMap<u32, usize> = BTreeMap::new();

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let (name, index, raw_value) = match split_line(line_no, line)? {
            Line::Blank => continue,
            Line::Assignment { key, index, value } => (key, index, value),
        };

        let Some(key) = Key::from_name(name) else {
            warn!("TRACKINFO line {line_no}: ignoring unknown key {name}");
            continue;
        };

        let value = raw_value.trim();
        if value != raw_value {
            warn!("TRACKINFO line {line_no}: trimmed whitespace around {name} value");
        }

        match (key, index) {
            (Key::Input, None) => input = (!value.is_empty()).then(|| PathBuf::from(value)),
            (Key::Input, Some(n)) => {
                first_override_line.entry(n).or_insert(line_no);
                if value.is_empty() {
                    track_inputs.remove(&n);
                } else {
                    track_inputs.insert(n, PathBuf::from(value));
                }
            }
            (Key::Title, Some(n)) => {
                titles.insert(n, value.to_string());
            }
            (Key::Title, None) => {
                return Err(ReflacError::parse(
                    line_no,
                    "TITLE needs a track index, e.g. TITLE[1]",
                ));
            }
            (key, None) => set_field(&mut shared, key, value, line_no)?,
            (key, Some(n)) => {
                first_override_line.entry(n).or_insert(line_no);
                set_field(overrides.entry(n).or_default(), key, value, line_no)?;
            }
        }
    }

    if let Some((n, &line_no)) = first_override_line
        .iter()
        .find(|(n, _)| !titles.contains_key(*n))
    {
        return Err(ReflacError::parse(
            line_no,
            format!("track {n} has fields but no TITLE[{n}]"),
        ));
    }

    if titles.is_empty() {
        return Err(ReflacError::MissingField("TITLE"));
    }

    let input_dir = input.map(|dir| base_dir.join(dir));
    let mut inputs = BTreeMap::new();
    for &n in titles.keys() {
        let dir = match (track_inputs.get(&n), &input_dir) {
            (Some(own), _) => base_dir.join(own),
            (None, Some(dir)) => dir.clone(),
            (None, None) => return Err(ReflacError::MissingField("INPUT")),
        };
        inputs.insert(n, dir);
    }

    Ok(AlbumInfo {
        shared,
        titles,
        inputs,
        overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<AlbumInfo> {
        parse_str(text, Path::new("/albums"))
    }

    fn parse_error_line(result: Result<AlbumInfo>) -> usize {
        match result {
            Err(ReflacError::Parse { line, .. }) => line,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn parses_full_album() {
        let info = parse(
            "INPUT=rips/blue\n\
             ALBUM=Blue\n\
             ARTIST=Joni Mitchell\n\
             GENRE=Folk\n\
             DATE=1971-06-22\n\
             COVER=front.jpg\n\
             TITLE[1]=All I Want\n\
             TITLE[2]=My Old Man\n\
             TITLE[3]=Little Green\n",
        )
        .unwrap();

        assert_eq!(info.input_dirs(), [Path::new("/albums/rips/blue")]);
        assert_eq!(info.shared.album.as_deref(), Some("Blue"));
        assert_eq!(info.shared.artist.as_deref(), Some("Joni Mitchell"));
        assert_eq!(info.shared.genre.as_deref(), Some("Folk"));
        assert_eq!(info.shared.date, NaiveDate::from_ymd_opt(1971, 6, 22));
        assert!(info.tracks().all(|t| {
            t.fields.cover == Some(PathBuf::from("/albums/rips/blue/front.jpg"))
        }));
        assert_eq!(info.titles.len(), 3);
        assert_eq!(
            info.titles.values().collect::<Vec<_>>(),
            ["All I Want", "My Old Man", "Little Green"]
        );
    }

    #[test]
    fn titles_ordered_by_index_not_by_line() {
        let info = parse("INPUT=x\nTITLE[10]=ten\nTITLE[2]=two\nTITLE[1]=one\n").unwrap();
        let order: Vec<_> = info.tracks().map(|t| (t.number, t.title)).collect();
        assert_eq!(order, [(1, "one"), (2, "two"), (10, "ten")]);
    }

    #[test]
    fn missing_input_is_missing_field() {
        let result = parse("ALBUM=Nothing\nTITLE[1]=a\n");
        assert!(matches!(result, Err(ReflacError::MissingField("INPUT"))));
    }

    #[test]
    fn empty_input_is_missing_field() {
        let result = parse("INPUT=\nTITLE[1]=a\n");
        assert!(matches!(result, Err(ReflacError::MissingField("INPUT"))));
    }

    #[test]
    fn duplicate_title_last_wins() {
        let info = parse("INPUT=x\nTITLE[1]=first\nTITLE[1]=second\n").unwrap();
        assert_eq!(info.titles.len(), 1);
        assert_eq!(info.titles[&1], "second");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let info = parse("INPUT=x\nBARCODE=0123\nTITLE[1]=a\nMOOD[1]=calm\n").unwrap();
        assert_eq!(info.titles.len(), 1);
        assert!(info.overrides.is_empty());
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let info = parse("# album notes\n\nINPUT=x\n   \n  # indented\nTITLE[1]=a\n").unwrap();
        assert_eq!(info.titles[&1], "a");
    }

    #[test]
    fn values_are_trimmed_and_may_contain_equals() {
        let info = parse("INPUT=x\nTITLE[1]=  1 + 1 = 2  \r\n").unwrap();
        assert_eq!(info.titles[&1], "1 + 1 = 2");
    }

    #[test]
    fn malformed_lines_report_line_number() {
        assert_eq!(parse_error_line(parse("INPUT=x\njust text\n")), 2);
        assert_eq!(parse_error_line(parse("INPUT=x\nTITLE[1=a\n")), 2);
        assert_eq!(parse_error_line(parse("INPUT=x\n\nTITLE[one]=a\n")), 3);
        assert_eq!(parse_error_line(parse("INPUT=x\nTITLE[0]=a\n")), 2);
        assert_eq!(parse_error_line(parse("=value\n")), 1);
    }

    #[test]
    fn title_without_index_rejected() {
        assert_eq!(parse_error_line(parse("INPUT=x\nTITLE=Album Title\n")), 2);
    }

    #[test]
    fn per_track_input_overrides_album_input() {
        let info = parse(
            "INPUT=cd1\n\
             COVER=front.jpg\n\
             TITLE[1]=a\n\
             TITLE[2]=b\n\
             TITLE[3]=c\n\
             INPUT[3]=cd2\n",
        )
        .unwrap();

        let tracks: Vec<_> = info.tracks().collect();
        assert_eq!(tracks[0].input_dir, Path::new("/albums/cd1"));
        assert_eq!(tracks[1].input_dir, Path::new("/albums/cd1"));
        assert_eq!(tracks[2].input_dir, Path::new("/albums/cd2"));
        assert_eq!(
            tracks[2].fields.cover,
            Some(PathBuf::from("/albums/cd2/front.jpg"))
        );
        assert_eq!(
            info.input_dirs(),
            [Path::new("/albums/cd1"), Path::new("/albums/cd2")]
        );
    }

    #[test]
    fn album_input_optional_when_every_track_has_one() {
        let info = parse("TITLE[1]=a\nINPUT[1]=one\nTITLE[2]=b\nINPUT[2]=two\n").unwrap();
        assert_eq!(info.inputs[&1], PathBuf::from("/albums/one"));
        assert_eq!(info.inputs[&2], PathBuf::from("/albums/two"));

        let result = parse("TITLE[1]=a\nINPUT[1]=one\nTITLE[2]=b\n");
        assert!(matches!(result, Err(ReflacError::MissingField("INPUT"))));
    }

    #[test]
    fn indexed_input_needs_a_title() {
        assert_eq!(parse_error_line(parse("INPUT=x\nTITLE[1]=a\nINPUT[2]=y\n")), 3);
    }

    #[test]
    fn no_titles_is_missing_field() {
        let result = parse("INPUT=x\nALBUM=Empty\n");
        assert!(matches!(result, Err(ReflacError::MissingField("TITLE"))));
    }

    #[test]
    fn leading_byte_order_mark_ignored() {
        let info = parse("\u{feff}INPUT=x\r\nTITLE[1]=a\r\n").unwrap();
        assert_eq!(info.input_dirs(), [Path::new("/albums/x")]);
        assert_eq!(info.titles[&1], "a");
    }

    #[test]
    fn date_must_be_calendar_date() {
        assert_eq!(parse_error_line(parse("INPUT=x\nDATE=1999\n")), 2);
        assert_eq!(parse_error_line(parse("INPUT=x\nDATE=1999-02-30\n")), 2);
        assert_eq!(parse_error_line(parse("INPUT=x\nDATE=1999-2-3\n")), 2);
    }

    #[test]
    fn disc_must_be_positive() {
        assert_eq!(parse_error_line(parse("INPUT=x\nDISC=0\n")), 2);
        let info = parse("INPUT=x\nDISC=2\nTITLE[1]=a\n").unwrap();
        assert_eq!(info.shared.disc, Some(2));
    }

    #[test]
    fn overrides_win_over_shared_values() {
        let info = parse(
            "INPUT=x\n\
             ARTIST=Various\n\
             ALBUM=Sampler\n\
             TITLE[1]=a\n\
             TITLE[2]=b\n\
             ARTIST[2]=Guest\n\
             COVER[2]=/art/b.png\n",
        )
        .unwrap();

        let tracks: Vec<_> = info.tracks().collect();
        assert_eq!(tracks[0].fields.artist.as_deref(), Some("Various"));
        assert_eq!(tracks[1].fields.artist.as_deref(), Some("Guest"));
        assert_eq!(tracks[1].fields.album.as_deref(), Some("Sampler"));
        assert_eq!(tracks[0].fields.cover, None);
        assert_eq!(tracks[1].fields.cover, Some(PathBuf::from("/art/b.png")));
    }

    #[test]
    fn override_without_title_rejected() {
        let result = parse("INPUT=x\nTITLE[1]=a\nARTIST[4]=nobody\nGENRE[4]=none\n");
        assert_eq!(parse_error_line(result), 3);
    }

    #[test]
    fn parse_file_resolves_input_next_to_trackinfo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TRACKINFO");
        fs::write(&path, "INPUT=src\nTITLE[1]=a\n").unwrap();

        let info = parse_file(&path).unwrap();
        assert_eq!(info.inputs[&1], dir.path().join("src"));
    }

    #[test]
    fn parse_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = parse_file(&dir.path().join("nope"));
        assert!(matches!(result, Err(ReflacError::Io { .. })));
    }
}
