//! Upload request value objects.
//!
//! Each request derives its file name and extension from the source path at
//! construction and whenever the path changes. Metadata fields are plain
//! `Option`s: `None` is never sent to the control plane.

use crate::core::error::{VodError, VodResult};
use crate::utils::path::{get_file_extension, get_file_name};

pub const DEFAULT_VIDEO_EXT: &str = "mp4";
pub const DEFAULT_IMAGE_TYPE: &str = "default";

/// Access shared by every request kind, used when a remote source is staged
/// to a local file before upload.
pub trait MediaRequest {
    fn file_path(&self) -> &str;
    fn file_name(&self) -> &str;
    fn media_ext(&self) -> &str;
    fn title(&self) -> &str;
    /// Points the request at a new source, keeping the current title.
    fn set_file_path(&mut self, file_path: &str, title: Option<&str>) -> VodResult<()>;
}

struct DerivedName {
    file_name: String,
    ext: Option<String>,
}

fn derive_name(file_path: &str) -> DerivedName {
    let (_, file_name) = get_file_name(file_path);
    let ext = get_file_extension(&file_name);
    DerivedName { file_name, ext }
}

fn strict_ext(file_path: &str, derived: &DerivedName) -> VodResult<String> {
    derived.ext.clone().ok_or_else(|| {
        VodError::InvalidParameter(format!("filePath has no extension: {}", file_path))
    })
}

/// An explicit title wins, then a title already set, then the file name.
fn next_title(current: String, explicit: Option<&str>, file_name: &str) -> String {
    match explicit {
        Some(title) => title.to_string(),
        None if !current.is_empty() => current,
        None => file_name.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadVideoRequest {
    file_path: String,
    file_name: String,
    media_ext: String,
    title: String,
    pub cate_id: Option<i64>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub template_group_id: Option<String>,
    pub storage_location: Option<String>,
    pub user_data: Option<String>,
    pub app_id: Option<String>,
    pub workflow_id: Option<String>,
    is_show_watermark: Option<bool>,
}

impl UploadVideoRequest {
    /// Never fails on a missing extension: videos fall back to `mp4`.
    pub fn new(file_path: &str, title: Option<&str>) -> Self {
        let mut request = Self::default();
        request.apply_path(file_path, title);
        request
    }

    fn apply_path(&mut self, file_path: &str, title: Option<&str>) {
        let derived = derive_name(file_path);
        self.file_path = file_path.to_string();
        self.media_ext = derived
            .ext
            .unwrap_or_else(|| DEFAULT_VIDEO_EXT.to_string());
        self.title = next_title(std::mem::take(&mut self.title), title, &derived.file_name);
        self.file_name = derived.file_name;
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn set_file_name(&mut self, file_name: &str) {
        self.file_name = file_name.to_string();
    }

    pub fn set_media_ext(&mut self, media_ext: &str) {
        self.media_ext = media_ext.to_string();
    }

    /// Disables the watermark for this upload only; meaningful when a global
    /// watermark is configured on the transcoding template.
    pub fn shutdown_watermark(&mut self) {
        self.is_show_watermark = Some(false);
    }

    pub fn watermark_switch(&self) -> Option<bool> {
        self.is_show_watermark
    }
}

impl MediaRequest for UploadVideoRequest {
    fn file_path(&self) -> &str {
        &self.file_path
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn media_ext(&self) -> &str {
        &self.media_ext
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_file_path(&mut self, file_path: &str, title: Option<&str>) -> VodResult<()> {
        self.apply_path(file_path, title);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UploadImageRequest {
    file_path: String,
    file_name: String,
    image_ext: String,
    title: String,
    pub image_type: String,
    pub cate_id: Option<i64>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub storage_location: Option<String>,
    pub user_data: Option<String>,
    pub app_id: Option<String>,
    pub workflow_id: Option<String>,
}

impl UploadImageRequest {
    pub fn new(file_path: &str, title: Option<&str>) -> VodResult<Self> {
        let derived = derive_name(file_path);
        let image_ext = strict_ext(file_path, &derived)?;

        Ok(Self {
            file_path: file_path.to_string(),
            title: next_title(String::new(), title, &derived.file_name),
            file_name: derived.file_name,
            image_ext,
            image_type: DEFAULT_IMAGE_TYPE.to_string(),
            cate_id: None,
            tags: None,
            description: None,
            storage_location: None,
            user_data: None,
            app_id: None,
            workflow_id: None,
        })
    }

    pub fn image_ext(&self) -> &str {
        &self.image_ext
    }

    pub fn set_image_ext(&mut self, image_ext: &str) {
        self.image_ext = image_ext.to_string();
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

impl MediaRequest for UploadImageRequest {
    fn file_path(&self) -> &str {
        &self.file_path
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn media_ext(&self) -> &str {
        &self.image_ext
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_file_path(&mut self, file_path: &str, title: Option<&str>) -> VodResult<()> {
        let derived = derive_name(file_path);
        self.image_ext = strict_ext(file_path, &derived)?;
        self.file_path = file_path.to_string();
        self.title = next_title(std::mem::take(&mut self.title), title, &derived.file_name);
        self.file_name = derived.file_name;
        Ok(())
    }
}

/// Auxiliary media such as watermarks or subtitles.
#[derive(Debug, Clone)]
pub struct UploadAttachedMediaRequest {
    file_path: String,
    file_name: String,
    media_ext: String,
    title: String,
    /// e.g. `watermark`, `subtitle`
    pub business_type: String,
    pub file_size: Option<u64>,
    pub cate_id: Option<i64>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub storage_location: Option<String>,
    pub user_data: Option<String>,
    pub app_id: Option<String>,
    pub workflow_id: Option<String>,
}

impl UploadAttachedMediaRequest {
    pub fn new(file_path: &str, business_type: &str, title: Option<&str>) -> VodResult<Self> {
        let derived = derive_name(file_path);
        let media_ext = strict_ext(file_path, &derived)?;

        Ok(Self {
            file_path: file_path.to_string(),
            title: next_title(String::new(), title, &derived.file_name),
            file_name: derived.file_name,
            media_ext,
            business_type: business_type.to_string(),
            file_size: None,
            cate_id: None,
            tags: None,
            description: None,
            storage_location: None,
            user_data: None,
            app_id: None,
            workflow_id: None,
        })
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

impl MediaRequest for UploadAttachedMediaRequest {
    fn file_path(&self) -> &str {
        &self.file_path
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn media_ext(&self) -> &str {
        &self.media_ext
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_file_path(&mut self, file_path: &str, title: Option<&str>) -> VodResult<()> {
        let derived = derive_name(file_path);
        self.media_ext = strict_ext(file_path, &derived)?;
        self.file_path = file_path.to_string();
        self.title = next_title(std::mem::take(&mut self.title), title, &derived.file_name);
        self.file_name = derived.file_name;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_defaults_extension_to_mp4() {
        let request = UploadVideoRequest::new("http://host/stream/live?auth=1", None);
        assert_eq!(request.file_name(), "live");
        assert_eq!(request.media_ext(), "mp4");
        assert_eq!(request.title(), "live");
    }

    #[test]
    fn image_and_attached_require_extension() {
        assert!(matches!(
            UploadImageRequest::new("http://host/stream/live?auth=1", None),
            Err(VodError::InvalidParameter(_))
        ));
        assert!(matches!(
            UploadAttachedMediaRequest::new("/opt/media/logo", "watermark", None),
            Err(VodError::InvalidParameter(_))
        ));

        let image = UploadImageRequest::new("/opt/media/cover.png", Some("Cover")).unwrap();
        assert_eq!(image.image_ext(), "png");
        assert_eq!(image.image_type, "default");
        assert_eq!(image.title(), "Cover");

        let attached =
            UploadAttachedMediaRequest::new("/opt/media/logo.png", "watermark", None).unwrap();
        assert_eq!(attached.media_ext(), "png");
        assert_eq!(attached.business_type, "watermark");
        assert_eq!(attached.title(), "logo.png");
    }

    #[test]
    fn title_survives_path_updates_unless_given() {
        let mut request = UploadVideoRequest::new("http://host/a/movie.mov", None);
        assert_eq!(request.title(), "movie.mov");

        request
            .set_file_path("/tmp/tmp_dlfiles/0c1b.mov", None)
            .unwrap();
        assert_eq!(request.title(), "movie.mov");
        assert_eq!(request.file_name(), "0c1b.mov");
        assert_eq!(request.media_ext(), "mov");

        request
            .set_file_path("/tmp/other.mkv", Some("Renamed"))
            .unwrap();
        assert_eq!(request.title(), "Renamed");
    }

    #[test]
    fn strict_requests_keep_state_on_failed_update() {
        let mut image = UploadImageRequest::new("/opt/a.jpg", None).unwrap();
        assert!(image.set_file_path("/opt/noext", None).is_err());
        assert_eq!(image.file_path(), "/opt/a.jpg");
        assert_eq!(image.image_ext(), "jpg");
    }

    #[test]
    fn watermark_switch_is_absent_until_shut_down() {
        let mut request = UploadVideoRequest::new("/opt/a.mp4", None);
        assert_eq!(request.watermark_switch(), None);
        request.shutdown_watermark();
        assert_eq!(request.watermark_switch(), Some(false));
    }
}
