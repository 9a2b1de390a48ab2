//! MLT XML as written and read by Shotcut.
//!
//! Each bin source becomes a `chain`, the soundtrack an `avformat` producer.
//! `playlist0` is the video track (`shotcut:video`), `playlist1` the audio
//! track (`shotcut:audio`), both stacked over a black background inside
//! `tractor0`. Entry `in`/`out` attributes carry the exclusive source range as
//! `HH:MM:SS.mmm` clock strings.

use std::{collections::HashMap, path::PathBuf};

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};

use crate::{ClipperError, MediaInfo, Result, Timecode};

use super::{ProjectAudio, ProjectClip, ProjectDocument, ProjectSource};

const MLT_VERSION: &str = "7.22.0";
const TITLE: &str = "clipper";
const SOUNDTRACK_ID: &str = "soundtrack";
const BLACK_ID: &str = "black";
const VIDEO_PLAYLIST_ID: &str = "playlist0";
const AUDIO_PLAYLIST_ID: &str = "playlist1";

fn chain_id(index: usize) -> String {
    format!("chain{index}")
}

struct MltWriter {
    inner: Writer<Vec<u8>>,
}

impl MltWriter {
    fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.inner.write_event(Event::Start(element))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for attr in attrs {
            element.push_attribute(*attr);
        }
        self.inner.write_event(Event::Empty(element))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.inner.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn property(&mut self, name: &str, value: &str) -> Result<()> {
        self.open("property", &[("name", name)])?;
        self.inner.write_event(Event::Text(BytesText::new(value)))?;
        self.close("property")
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.inner.into_inner())
            .map_err(|err| ClipperError::Project(format!("generated XML is not UTF-8: {err}")))
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

pub(super) fn write(document: &ProjectDocument) -> Result<String> {
    let mut xml = MltWriter::new();
    let length = document.length().to_string();
    let zero = Timecode::ZERO.to_string();
    let profile = &document.profile;

    xml.inner
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("no"))))?;
    xml.open(
        "mlt",
        &[
            ("LC_NUMERIC", "C"),
            ("version", MLT_VERSION),
            ("title", TITLE),
            ("producer", "main_bin"),
        ],
    )?;

    let divisor = gcd(profile.width, profile.height).max(1);
    xml.empty(
        "profile",
        &[
            (
                "description",
                &format!(
                    "{}x{} {}/{} fps",
                    profile.width, profile.height, profile.frame_rate_num, profile.frame_rate_den
                ),
            ),
            ("width", &profile.width.to_string()),
            ("height", &profile.height.to_string()),
            ("progressive", "1"),
            ("sample_aspect_num", "1"),
            ("sample_aspect_den", "1"),
            ("display_aspect_num", &(profile.width / divisor).to_string()),
            ("display_aspect_den", &(profile.height / divisor).to_string()),
            ("frame_rate_num", &profile.frame_rate_num.to_string()),
            ("frame_rate_den", &profile.frame_rate_den.to_string()),
            ("colorspace", "709"),
        ],
    )?;

    for (index, source) in document.sources.iter().enumerate() {
        let duration = source.duration.to_string();
        xml.open("chain", &[("id", &chain_id(index)), ("out", &duration)])?;
        xml.property("length", &duration)?;
        xml.property("eof", "pause")?;
        xml.property("resource", &source.path.to_string_lossy())?;
        xml.property("mlt_service", "avformat-novalidate")?;
        xml.property("seekable", "1")?;
        xml.property("audio_index", "1")?;
        xml.property("video_index", "0")?;
        let caption = source
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        xml.property("shotcut:caption", &caption)?;
        xml.close("chain")?;
    }

    let audio_length = document.audio_track.length.to_string();
    xml.open(
        "producer",
        &[("id", SOUNDTRACK_ID), ("in", &zero), ("out", &audio_length)],
    )?;
    xml.property("length", &audio_length)?;
    xml.property("eof", "pause")?;
    xml.property("resource", &document.audio_track.source.to_string_lossy())?;
    xml.property("mlt_service", "avformat-novalidate")?;
    xml.property("audio_index", "0")?;
    xml.property("video_index", "-1")?;
    xml.close("producer")?;

    xml.open("playlist", &[("id", "main_bin"), ("title", TITLE)])?;
    xml.property("shotcut:projectAudioChannels", "2")?;
    xml.property("shotcut:projectFolder", "1")?;
    xml.property("xml_retain", "1")?;
    for (index, source) in document.sources.iter().enumerate() {
        xml.empty(
            "entry",
            &[
                ("producer", &chain_id(index)),
                ("in", &zero),
                ("out", &source.duration.to_string()),
            ],
        )?;
    }
    xml.close("playlist")?;

    xml.open("producer", &[("id", BLACK_ID), ("in", &zero), ("out", &length)])?;
    xml.property("length", &length)?;
    xml.property("eof", "pause")?;
    xml.property("resource", "0")?;
    xml.property("aspect_ratio", "1")?;
    xml.property("mlt_service", "color")?;
    xml.property("mlt_image_format", "rgba")?;
    xml.property("set.test_audio", "0")?;
    xml.close("producer")?;

    xml.open("playlist", &[("id", "background")])?;
    xml.empty(
        "entry",
        &[("producer", BLACK_ID), ("in", &zero), ("out", &length)],
    )?;
    xml.close("playlist")?;

    xml.open("playlist", &[("id", VIDEO_PLAYLIST_ID)])?;
    xml.property("shotcut:video", "1")?;
    xml.property("shotcut:name", "V1")?;
    let mut cursor = Timecode::ZERO;
    for (index, clip) in document.video_track.iter().enumerate() {
        let source = document
            .sources
            .iter()
            .position(|source| source.path == clip.source)
            .ok_or_else(|| {
                ClipperError::Project(format!(
                    "video clip {index} references {} which is not in the bin",
                    clip.source.display()
                ))
            })?;
        if clip.position < cursor {
            return Err(ClipperError::Project(format!(
                "video clip {index} overlaps the previous clip"
            )));
        }
        if clip.position > cursor {
            xml.empty("blank", &[("length", &(clip.position - cursor).to_string())])?;
        }
        xml.empty(
            "entry",
            &[
                ("producer", &chain_id(source)),
                ("in", &clip.in_point.to_string()),
                ("out", &clip.out_point.to_string()),
            ],
        )?;
        cursor = clip.position + (clip.out_point - clip.in_point);
    }
    xml.close("playlist")?;

    xml.open("playlist", &[("id", AUDIO_PLAYLIST_ID)])?;
    xml.property("shotcut:audio", "1")?;
    xml.property("shotcut:name", "A1")?;
    xml.empty(
        "entry",
        &[("producer", SOUNDTRACK_ID), ("in", &zero), ("out", &audio_length)],
    )?;
    xml.close("playlist")?;

    xml.open(
        "tractor",
        &[("id", "tractor0"), ("title", TITLE), ("in", &zero), ("out", &length)],
    )?;
    xml.property("shotcut", "1")?;
    xml.property("shotcut:projectAudioChannels", "2")?;
    xml.property("shotcut:projectFolder", "1")?;
    xml.empty("track", &[("producer", "background")])?;
    xml.empty("track", &[("producer", VIDEO_PLAYLIST_ID)])?;
    xml.empty(
        "track",
        &[("producer", AUDIO_PLAYLIST_ID), ("hide", "video")],
    )?;
    for (id, b_track) in [("transition0", "1"), ("transition1", "2")] {
        xml.open("transition", &[("id", id)])?;
        xml.property("a_track", "0")?;
        xml.property("b_track", b_track)?;
        xml.property("mlt_service", "mix")?;
        xml.property("always_active", "1")?;
        xml.property("sum", "1")?;
        xml.close("transition")?;
    }
    xml.open("transition", &[("id", "transition2")])?;
    xml.property("a_track", "0")?;
    xml.property("b_track", "1")?;
    xml.property("version", "0.1")?;
    xml.property("mlt_service", "frei0r.cairoblend")?;
    xml.property("threads", "0")?;
    xml.property("disable", "1")?;
    xml.close("transition")?;
    xml.close("tractor")?;

    xml.close("mlt")?;
    xml.finish()
}

#[derive(Debug, Default)]
struct Producer {
    id: String,
    properties: HashMap<String, String>,
}

#[derive(Debug)]
struct PlaylistEntry {
    producer: String,
    in_point: Timecode,
    out_point: Timecode,
    position: Timecode,
}

#[derive(Debug, Default)]
struct Playlist {
    id: String,
    properties: HashMap<String, String>,
    entries: Vec<PlaylistEntry>,
    cursor: Timecode,
}

#[derive(Debug, Default)]
struct MltParser {
    profile: Option<MediaInfo>,
    chains: Vec<Producer>,
    producers: Vec<Producer>,
    playlists: Vec<Playlist>,
    open_producer: Option<(bool, Producer)>,
    open_playlist: Option<Playlist>,
    open_property: Option<String>,
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        map.insert(key, attr.unescape_value()?.into_owned());
    }
    Ok(map)
}

fn required<'a>(attrs: &'a HashMap<String, String>, element: &str, key: &str) -> Result<&'a str> {
    attrs
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ClipperError::Project(format!("<{element}> is missing `{key}`")))
}

fn number<T: std::str::FromStr>(attrs: &HashMap<String, String>, key: &str) -> Result<T> {
    required(attrs, "profile", key)?
        .parse()
        .map_err(|_| ClipperError::Project(format!("profile `{key}` is not a number")))
}

impl MltParser {
    fn start(&mut self, element: &BytesStart<'_>, empty: bool) -> Result<()> {
        let name = element.name();
        match name.as_ref() {
            b"profile" => {
                let attrs = attributes(element)?;
                self.profile = Some(MediaInfo {
                    width: number(&attrs, "width")?,
                    height: number(&attrs, "height")?,
                    frame_rate_num: number(&attrs, "frame_rate_num")?,
                    frame_rate_den: number(&attrs, "frame_rate_den")?,
                });
            }
            tag @ (b"chain" | b"producer") => {
                let attrs = attributes(element)?;
                let producer = Producer {
                    id: required(&attrs, "producer", "id")?.to_string(),
                    properties: HashMap::new(),
                };
                if empty {
                    self.store_producer(tag == b"chain", producer);
                } else {
                    self.open_producer = Some((tag == b"chain", producer));
                }
            }
            b"playlist" => {
                let attrs = attributes(element)?;
                let playlist = Playlist {
                    id: required(&attrs, "playlist", "id")?.to_string(),
                    ..Default::default()
                };
                if empty {
                    self.playlists.push(playlist);
                } else {
                    self.open_playlist = Some(playlist);
                }
            }
            b"entry" => {
                let attrs = attributes(element)?;
                if let Some(playlist) = self.open_playlist.as_mut() {
                    let in_point: Timecode = required(&attrs, "entry", "in")?.parse()?;
                    let out_point: Timecode = required(&attrs, "entry", "out")?.parse()?;
                    playlist.entries.push(PlaylistEntry {
                        producer: required(&attrs, "entry", "producer")?.to_string(),
                        in_point,
                        out_point,
                        position: playlist.cursor,
                    });
                    playlist.cursor += out_point - in_point;
                }
            }
            b"blank" => {
                let attrs = attributes(element)?;
                if let Some(playlist) = self.open_playlist.as_mut() {
                    let length: Timecode = required(&attrs, "blank", "length")?.parse()?;
                    playlist.cursor += length;
                }
            }
            b"property" if !empty => {
                let attrs = attributes(element)?;
                self.open_property = Some(required(&attrs, "property", "name")?.to_string());
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, value: String) {
        let Some(name) = self.open_property.take() else {
            return;
        };
        if let Some((_, producer)) = self.open_producer.as_mut() {
            producer.properties.insert(name, value);
        } else if let Some(playlist) = self.open_playlist.as_mut() {
            playlist.properties.insert(name, value);
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"chain" | b"producer" => {
                if let Some((is_chain, producer)) = self.open_producer.take() {
                    self.store_producer(is_chain, producer);
                }
            }
            b"playlist" => {
                if let Some(playlist) = self.open_playlist.take() {
                    self.playlists.push(playlist);
                }
            }
            b"property" => self.open_property = None,
            _ => {}
        }
    }

    fn store_producer(&mut self, is_chain: bool, producer: Producer) {
        if is_chain {
            self.chains.push(producer);
        } else {
            self.producers.push(producer);
        }
    }

    fn resource(&self, id: &str) -> Result<PathBuf> {
        self.chains
            .iter()
            .chain(&self.producers)
            .find(|producer| producer.id == id)
            .and_then(|producer| producer.properties.get("resource"))
            .map(PathBuf::from)
            .ok_or_else(|| ClipperError::Project(format!("producer `{id}` has no resource")))
    }

    fn playlist_with(&self, property: &str, fallback_id: &str) -> Result<&Playlist> {
        self.playlists
            .iter()
            .find(|playlist| playlist.properties.get(property).map(String::as_str) == Some("1"))
            .or_else(|| self.playlists.iter().find(|playlist| playlist.id == fallback_id))
            .ok_or_else(|| ClipperError::Project(format!("no playlist marked `{property}`")))
    }

    fn finish(self) -> Result<ProjectDocument> {
        let profile = self
            .profile
            .clone()
            .ok_or_else(|| ClipperError::Project("missing <profile>".to_string()))?;

        let sources = self
            .chains
            .iter()
            .map(|chain| {
                let duration: Timecode = chain
                    .properties
                    .get("length")
                    .ok_or_else(|| {
                        ClipperError::Project(format!("chain `{}` has no length", chain.id))
                    })?
                    .parse()?;
                Ok(ProjectSource {
                    path: self.resource(&chain.id)?,
                    duration,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let video_track = self
            .playlist_with("shotcut:video", VIDEO_PLAYLIST_ID)?
            .entries
            .iter()
            .map(|entry| {
                Ok(ProjectClip {
                    source: self.resource(&entry.producer)?,
                    in_point: entry.in_point,
                    out_point: entry.out_point,
                    position: entry.position,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let audio_entry = self
            .playlist_with("shotcut:audio", AUDIO_PLAYLIST_ID)?
            .entries
            .first()
            .ok_or_else(|| ClipperError::Project("audio track is empty".to_string()))?;
        let audio_track = ProjectAudio {
            source: self.resource(&audio_entry.producer)?,
            length: audio_entry.out_point - audio_entry.in_point,
        };

        Ok(ProjectDocument {
            profile,
            sources,
            video_track,
            audio_track,
        })
    }
}

pub(super) fn read(xml: &str) -> Result<ProjectDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut parser = MltParser::default();

    loop {
        match reader.read_event()? {
            Event::Start(element) => parser.start(&element, false)?,
            Event::Empty(element) => parser.start(&element, true)?,
            Event::Text(text) => parser.text(text.unescape()?.into_owned()),
            Event::End(element) => parser.end(element.name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }

    parser.finish()
}
