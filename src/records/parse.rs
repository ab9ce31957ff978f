//! Typed record bodies per collection.
//!
//! Each collection's lexicon shape is read with a private serde struct and
//! flattened into the columns downstream analysis works with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use super::error::{RecordError, RecordResult};
use crate::storage::LinkRepr;

/// the most images a post embed can carry
pub const MAX_IMAGES: usize = 4;

/// A record collection (lexicon NSID) we can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Post,
    Like,
    Repost,
    Follow,
    Block,
    Profile,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Post,
        Collection::Like,
        Collection::Repost,
        Collection::Follow,
        Collection::Block,
        Collection::Profile,
    ];

    pub fn nsid(&self) -> &'static str {
        match self {
            Collection::Post => "app.bsky.feed.post",
            Collection::Like => "app.bsky.feed.like",
            Collection::Repost => "app.bsky.feed.repost",
            Collection::Follow => "app.bsky.graph.follow",
            Collection::Block => "app.bsky.graph.block",
            Collection::Profile => "app.bsky.actor.profile",
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nsid())
    }
}

impl FromStr for Collection {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_nsid(s).ok_or_else(|| RecordError::UnsupportedCollection(s.to_string()))
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.nsid())
    }
}

/// A parsed record, one variant per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RecordBody {
    Post(PostRecord),
    Like(SubjectRecord),
    Repost(SubjectRecord),
    Follow(FollowRecord),
    Block(FollowRecord),
    Profile(ProfileRecord),
}

impl RecordBody {
    pub fn collection(&self) -> Collection {
        match self {
            RecordBody::Post(_) => Collection::Post,
            RecordBody::Like(_) => Collection::Like,
            RecordBody::Repost(_) => Collection::Repost,
            RecordBody::Follow(_) => Collection::Follow,
            RecordBody::Block(_) => Collection::Block,
            RecordBody::Profile(_) => Collection::Profile,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub text: String,
    pub langs: Vec<String>,
    pub created_at: String,
    pub root_uri: Option<String>,
    pub parent_uri: Option<String>,
    /// quoted record
    pub subject_uri: Option<String>,
    pub link_card_url: Option<String>,
    pub link_card_thumb: Option<String>,
    pub link_card_title: Option<String>,
    pub link_card_desc: Option<String>,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub link: Option<String>,
    pub alt: Option<String>,
}

/// likes and reposts point at another record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectRecord {
    pub subject_uri: String,
    pub created_at: String,
}

/// follows and blocks point at an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowRecord {
    pub subject_did: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileRecord {
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// read `value` as a record of `collection`
pub fn parse_record(collection: Collection, value: &Value) -> RecordResult<RecordBody> {
    let invalid = |source| RecordError::Invalid { collection, source };

    let body = match collection {
        Collection::Post => {
            let raw = RawPost::deserialize(value).map_err(invalid)?;
            RecordBody::Post(raw.into_record(value))
        }
        Collection::Like | Collection::Repost => {
            let raw = RawSubjectRecord::deserialize(value).map_err(invalid)?;
            let record = SubjectRecord {
                subject_uri: raw.subject.uri,
                created_at: raw.created_at,
            };
            if collection == Collection::Like {
                RecordBody::Like(record)
            } else {
                RecordBody::Repost(record)
            }
        }
        Collection::Follow | Collection::Block => {
            let raw = RawDidRecord::deserialize(value).map_err(invalid)?;
            let record = FollowRecord {
                subject_did: raw.subject,
                created_at: raw.created_at,
            };
            if collection == Collection::Follow {
                RecordBody::Follow(record)
            } else {
                RecordBody::Block(record)
            }
        }
        Collection::Profile => {
            let raw = RawProfile::deserialize(value).map_err(invalid)?;
            RecordBody::Profile(ProfileRecord {
                display_name: raw.display_name,
                description: raw.description,
            })
        }
    };

    Ok(body)
}

#[derive(Deserialize)]
struct StrongRef {
    uri: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubjectRecord {
    subject: StrongRef,
    created_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDidRecord {
    subject: String,
    created_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPost {
    text: String,
    #[serde(default)]
    langs: Vec<String>,
    created_at: String,
    #[serde(default)]
    reply: Option<RawReply>,
    #[serde(default)]
    embed: Option<RawEmbed>,
}

#[derive(Deserialize)]
struct RawReply {
    root: StrongRef,
    parent: StrongRef,
}

#[derive(Deserialize)]
#[serde(tag = "$type")]
enum RawEmbed {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<RawImage> },
    #[serde(rename = "app.bsky.embed.external")]
    External { external: RawExternal },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { record: RawQuote, media: RawMedia },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct RawQuote {
    record: StrongRef,
}

#[derive(Deserialize)]
#[serde(tag = "$type")]
enum RawMedia {
    #[serde(rename = "app.bsky.embed.images")]
    Images { images: Vec<RawImage> },
    #[serde(rename = "app.bsky.embed.external")]
    External { external: RawExternal },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct RawImage {
    image: RawBlob,
    #[serde(default)]
    alt: Option<String>,
}

/// a blob reference; legacy blobs carry no `ref`
#[derive(Deserialize)]
struct RawBlob {
    #[serde(rename = "ref", default)]
    reference: Option<LinkRepr>,
}

impl RawBlob {
    fn link(self) -> Option<String> {
        self.reference.map(LinkRepr::into_string)
    }
}

#[derive(Deserialize)]
struct RawExternal {
    uri: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    thumb: Option<RawBlob>,
}

impl RawPost {
    fn into_record(self, source: &Value) -> PostRecord {
        let mut post = PostRecord {
            text: self.text,
            langs: self.langs,
            created_at: self.created_at,
            ..Default::default()
        };

        if let Some(reply) = self.reply {
            post.root_uri = Some(reply.root.uri);
            post.parent_uri = Some(reply.parent.uri);
        }

        match self.embed {
            Some(RawEmbed::Images { images }) => post.set_images(images),
            Some(RawEmbed::External { external }) => post.set_link_card(external),
            Some(RawEmbed::Record { record }) => post.subject_uri = Some(record.uri),
            Some(RawEmbed::RecordWithMedia { record, media }) => {
                post.subject_uri = Some(record.record.uri);
                match media {
                    RawMedia::Images { images } => post.set_images(images),
                    RawMedia::External { external } => post.set_link_card(external),
                    RawMedia::Unsupported => warn!(
                        media_type = embed_type(source, &["embed", "media"]),
                        "unsupported media type in post embed"
                    ),
                }
            }
            Some(RawEmbed::Unsupported) => warn!(
                embed_type = embed_type(source, &["embed"]),
                "unsupported post embed type"
            ),
            None => {}
        }

        post
    }
}

impl PostRecord {
    fn set_images(&mut self, images: Vec<RawImage>) {
        self.images = images
            .into_iter()
            .take(MAX_IMAGES)
            .map(|image| ImageRef {
                link: image.image.link(),
                alt: image.alt,
            })
            .collect();
    }

    fn set_link_card(&mut self, external: RawExternal) {
        self.link_card_url = Some(external.uri);
        self.link_card_title = external.title;
        self.link_card_desc = external.description;
        self.link_card_thumb = external.thumb.and_then(RawBlob::link);
    }
}

fn embed_type<'a>(source: &'a Value, path: &[&str]) -> &'a str {
    path.iter()
        .try_fold(source, |value, field| value.get(*field))
        .and_then(|value| value.get("$type"))
        .and_then(Value::as_str)
        .unwrap_or("<none>")
}
