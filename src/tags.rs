use crate::error::{ReflacError, Result};
use lofty::config::WriteOptions;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use log::{debug, warn};
use std::fs::File;
use std::path::Path;

/// Tag fields reflac writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagField {
    Title,
    Album,
    Artist,
    Genre,
    Date,
    Lyricist,
    Composer,
    Arranger,
    Label,
    Comment,
    TrackNumber,
    DiscNumber,
}

impl TagField {
    fn item_key(self) -> ItemKey {
        match self {
            TagField::Title => ItemKey::TrackTitle,
            TagField::Album => ItemKey::AlbumTitle,
            TagField::Artist => ItemKey::TrackArtist,
            TagField::Genre => ItemKey::Genre,
            TagField::Date => ItemKey::RecordingDate,
            TagField::Lyricist => ItemKey::Lyricist,
            TagField::Composer => ItemKey::Composer,
            TagField::Arranger => ItemKey::Arranger,
            TagField::Label => ItemKey::Label,
            TagField::Comment => ItemKey::Comment,
            TagField::TrackNumber => ItemKey::TrackNumber,
            TagField::DiscNumber => ItemKey::DiscNumber,
        }
    }
}

/// Ordered field/value pairs destined for one file.
pub type TrackTags = Vec<(TagField, String)>;

/// Writes metadata onto audio files.
pub trait TagWriter {
    /// Check that `path` can be read and tagged, without modifying it.
    fn check(&self, path: &Path) -> Result<()>;

    /// Set every field in `tags` on `path`, replacing existing values. When
    /// `cover` is given it replaces any existing front cover.
    fn write(&mut self, path: &Path, tags: &TrackTags, cover: Option<&Picture>) -> Result<()>;
}

/// [`TagWriter`] backed by lofty, using each format's primary tag type.
#[derive(Debug, Default)]
pub struct LoftyWriter;

impl TagWriter for LoftyWriter {
    fn check(&self, path: &Path) -> Result<()> {
        Probe::open(path)
            .and_then(|p| p.read())
            .map(|_| ())
            .map_err(|e| ReflacError::tag(path, e))
    }

    fn write(&mut self, path: &Path, tags: &TrackTags, cover: Option<&Picture>) -> Result<()> {
        let tagged_file = Probe::open(path)
            .and_then(|p| p.read())
            .map_err(|e| ReflacError::tag(path, e))?;

        let mut tag = match tagged_file.primary_tag() {
            Some(tag) => tag.clone(),
            None => {
                let tag_type = tagged_file.primary_tag_type();
                debug!("{}: creating {:?} tag", path.display(), tag_type);
                Tag::new(tag_type)
            }
        };

        for field in insert_fields(&mut tag, tags) {
            warn!(
                "{}: {:?} tags cannot hold {:?}, skipped",
                path.display(),
                tag.tag_type(),
                field
            );
        }

        if let Some(picture) = cover {
            tag.remove_picture_type(PictureType::CoverFront);
            tag.push_picture(picture.clone());
        }

        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| ReflacError::tag(path, e))?;
        debug!("{}: wrote {} fields", path.display(), tags.len());
        Ok(())
    }
}

/// Set every field in `tags`, returning the ones `tag`'s format has no slot for.
fn insert_fields(tag: &mut Tag, tags: &TrackTags) -> Vec<TagField> {
    tags.iter()
        .filter(|(field, value)| !tag.insert_text(field.item_key(), value.clone()))
        .map(|(field, _)| *field)
        .collect()
}

fn is_flac(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("flac"))
}

/// Load a cover image as a front-cover picture.
///
/// A `.flac` path yields the picture embedded in that file, preferring its
/// front cover.
pub fn load_cover(path: &Path) -> Result<Picture> {
    let picture = if is_flac(path) {
        embedded_cover(path)?
    } else {
        let mut file = File::open(path).map_err(|e| ReflacError::io(path, e))?;
        Picture::from_reader(&mut file).map_err(|e| ReflacError::InvalidCover {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };
    Ok(Picture::new_unchecked(
        PictureType::CoverFront,
        picture.mime_type().cloned(),
        None,
        picture.data().to_vec(),
    ))
}

fn embedded_cover(path: &Path) -> Result<Picture> {
    if !path.exists() {
        return Err(ReflacError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ));
    }

    let tagged_file = Probe::open(path)
        .and_then(|p| p.read())
        .map_err(|e| ReflacError::tag(path, e))?;

    let pictures: Vec<&Picture> = tagged_file
        .tags()
        .iter()
        .flat_map(|tag| tag.pictures())
        .collect();

    pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
        .map(|p| (*p).clone())
        .ok_or_else(|| ReflacError::InvalidCover {
            path: path.to_path_buf(),
            reason: "file has no embedded picture".to_string(),
        })
}
