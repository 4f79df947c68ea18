use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque key/value data handed back to the caller with the outcome.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// Completion callback for a request. Being `FnOnce`, it can fire at most once.
pub type Callback = Box<dyn FnOnce(ThumbOutcome) + Send + 'static>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide request identifier. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Broad class of source media, used to match requests with worker capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const VIDEO_EXTENSIONS: &[&str] = &[
    "avi", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ogv", "ts", "webm", "wmv",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "jpeg", "jpg", "png", "tga", "tif", "tiff", "webp",
];

/// Frame tags that only make sense for video sources
const VIDEO_FRAMES: &[&str] = &["vthumb"];

impl MediaKind {
    /// Kind of media a file extension stands for, if it is one we thumbnail
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    /// Guess the kind of media behind a locator. Unknown extensions count
    /// as images.
    pub fn guess(url: &str, frame: Option<&str>) -> Self {
        if frame.is_some_and(|f| VIDEO_FRAMES.contains(&f)) {
            return MediaKind::Video;
        }

        let path = url.split(['?', '#']).next().unwrap_or(url);
        Path::new(path)
            .extension()
            .and_then(|ext| Self::from_extension(&ext.to_string_lossy()))
            .unwrap_or(MediaKind::Image)
    }
}

/// What the caller learns when a request finishes
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbOutcome {
    pub success: bool,
    pub url: String,
    pub dest: PathBuf,
    pub extra: Extra,
}

/// One thumbnail job
pub struct Request {
    id: RequestId,
    pub url: String,
    pub dest: PathBuf,
    pub frame: Option<String>,
    pub kind: MediaKind,
    callback: Option<Callback>,
    extra: Extra,
}

impl Request {
    /// Create a new request with a fresh id
    pub fn new(
        url: impl Into<String>,
        dest: PathBuf,
        frame: Option<String>,
        callback: Option<Callback>,
        extra: Extra,
    ) -> Self {
        let url = url.into();
        let kind = MediaKind::guess(&url, frame.as_deref());
        Self {
            id: RequestId::next(),
            url,
            dest,
            frame,
            kind,
            callback,
            extra,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Whether anyone is still waiting for this request's outcome
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Drop the callback and extra data; the outcome will be discarded.
    pub fn detach(&mut self) {
        self.callback = None;
        self.extra.clear();
    }

    /// Deliver the outcome to the callback, if one is still attached.
    /// Returns whether a callback ran.
    pub fn complete(mut self, success: bool) -> bool {
        match self.callback.take() {
            Some(callback) => {
                callback(ThumbOutcome {
                    success,
                    url: self.url,
                    dest: self.dest,
                    extra: self.extra,
                });
                true
            }
            None => false,
        }
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("dest", &self.dest)
            .field("frame", &self.frame)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
