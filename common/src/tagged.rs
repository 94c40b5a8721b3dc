use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;

/// A message family whose JSON form is keyed by a single variant tag.
///
/// `Tag` is a plain enum with one variant per message variant, so handler
/// tables can be indexed by it and a handler for a tag that does not exist
/// cannot be registered.
pub trait Tagged: Serialize + DeserializeOwned + Debug + Send + 'static {
    type Tag: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn tag(&self) -> Self::Tag;

    /// Resolve the raw top-level JSON key of a frame.
    fn tag_from_key(key: &str) -> Option<Self::Tag>;

    fn tag_key(tag: Self::Tag) -> &'static str;
}

/// Declares the tag enum of a message family and implements [`Tagged`] for it.
macro_rules! tagged {
    ($message:ident => $tag:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $tag {
            $($variant),+
        }

        impl $tag {
            pub const ALL: &'static [$tag] = &[$($tag::$variant),+];

            pub fn key(self) -> &'static str {
                match self {
                    $($tag::$variant => stringify!($variant)),+
                }
            }
        }

        impl $crate::Tagged for $message {
            type Tag = $tag;

            fn tag(&self) -> $tag {
                match self {
                    $($message::$variant { .. } => $tag::$variant),+
                }
            }

            fn tag_from_key(key: &str) -> Option<$tag> {
                match key {
                    $(stringify!($variant) => Some($tag::$variant),)+
                    _ => None,
                }
            }

            fn tag_key(tag: $tag) -> &'static str {
                tag.key()
            }
        }
    };
}

pub(crate) use tagged;
