use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use uuid::Uuid;

use crate::errors::StudioError;

/// A user-supplied image used as visual grounding for generation.
/// Immutable once created; overlay merges produce a new image.
#[derive(Clone)]
pub struct ReferenceImage {
    pub id: String,
    pub name: String,
    pub pixels: DynamicImage,
}

#[derive(Default)]
pub struct ReferenceLibrary {
    entries: Vec<ReferenceImage>,
}

impl ReferenceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by name: a duplicate upload returns the existing id and
    /// leaves the stored entry untouched.
    pub fn add(&mut self, name: impl Into<String>, pixels: DynamicImage) -> String {
        let name = name.into();
        if let Some(existing) = self.entries.iter().find(|entry| entry.name == name) {
            return existing.id.clone();
        }
        let id = Uuid::new_v4().to_string();
        self.entries.push(ReferenceImage {
            id: id.clone(),
            name,
            pixels,
        });
        id
    }

    pub fn list(&self) -> &[ReferenceImage] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ReferenceImage> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Projects the subset in caller order. An unknown id is a contract
    /// violation and fails the whole selection.
    pub fn select_active(&self, ids: &[String]) -> Result<Vec<ReferenceImage>, StudioError> {
        let mut active = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = self.get(id) else {
                return Err(StudioError::not_found(format!(
                    "reference image '{id}' is not in the library"
                )));
            };
            active.push(entry.clone());
        }
        Ok(active)
    }

    pub fn remove(&mut self, id: &str) -> Result<ReferenceImage, StudioError> {
        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            return Err(StudioError::not_found(format!(
                "reference image '{id}' is not in the library"
            )));
        };
        Ok(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Alpha-composites a freehand overlay onto a base image and flattens the
/// result to opaque RGB. The overlay must match the base dimensions; the
/// meaning of its stroke colors is carried only in prompt text.
pub fn merge_overlay(
    base: &DynamicImage,
    overlay: &RgbaImage,
) -> Result<DynamicImage, StudioError> {
    if base.width() != overlay.width() || base.height() != overlay.height() {
        return Err(StudioError::configuration(format!(
            "overlay is {}x{} but the base image is {}x{}",
            overlay.width(),
            overlay.height(),
            base.width(),
            base.height()
        )));
    }

    let under = base.to_rgb8();
    let mut merged = RgbImage::new(under.width(), under.height());
    for (x, y, stroke) in overlay.enumerate_pixels() {
        let alpha = u16::from(stroke[3]);
        let below = under.get_pixel(x, y);
        let blend = |over: u8, base: u8| -> u8 {
            ((u16::from(over) * alpha + u16::from(base) * (255 - alpha)) / 255) as u8
        };
        merged.put_pixel(
            x,
            y,
            Rgb([
                blend(stroke[0], below[0]),
                blend(stroke[1], below[1]),
                blend(stroke[2], below[2]),
            ]),
        );
    }
    Ok(DynamicImage::ImageRgb8(merged))
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

    use super::{merge_overlay, ReferenceLibrary};
    use crate::errors::StudioError;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb(color);
        }
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn add_is_idempotent_by_name() {
        let mut library = ReferenceLibrary::new();
        let first = library.add("facade", solid(4, 4, [10, 20, 30]));
        let second = library.add("facade", solid(4, 4, [200, 200, 200]));
        assert_eq!(first, second);
        assert_eq!(library.len(), 1);
        assert_eq!(library.list()[0].pixels.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let mut library = ReferenceLibrary::new();
        library.add("first", solid(2, 2, [1, 1, 1]));
        library.add("second", solid(2, 2, [2, 2, 2]));
        library.add("third", solid(2, 2, [3, 3, 3]));
        let names: Vec<&str> = library.list().iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn select_active_projects_in_caller_order() {
        let mut library = ReferenceLibrary::new();
        let a = library.add("a", solid(2, 2, [1, 1, 1]));
        let b = library.add("b", solid(2, 2, [2, 2, 2]));
        let active = library.select_active(&[b.clone(), a.clone()]).expect("selection");
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, b);
        assert_eq!(active[1].id, a);
    }

    #[test]
    fn select_active_rejects_unknown_id() {
        let mut library = ReferenceLibrary::new();
        library.add("a", solid(2, 2, [1, 1, 1]));
        let result = library.select_active(&["missing".to_string()]);
        assert!(matches!(result, Err(StudioError::NotFound(_))));
    }

    #[test]
    fn remove_then_clear() {
        let mut library = ReferenceLibrary::new();
        let id = library.add("a", solid(2, 2, [1, 1, 1]));
        library.add("b", solid(2, 2, [2, 2, 2]));
        library.remove(&id).expect("remove");
        assert_eq!(library.len(), 1);
        assert!(matches!(
            library.remove(&id),
            Err(StudioError::NotFound(_))
        ));
        library.clear();
        assert!(library.is_empty());
    }

    #[test]
    fn merge_overlay_flattens_to_opaque_rgb() {
        let base = solid(2, 1, [0, 0, 0]);
        let mut overlay = RgbaImage::new(2, 1);
        overlay.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        overlay.put_pixel(1, 0, Rgba([255, 0, 0, 0]));

        let merged = merge_overlay(&base, &overlay).expect("merge");
        let rgb = merged.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn merge_overlay_rejects_size_mismatch() {
        let base = solid(4, 4, [0, 0, 0]);
        let overlay = RgbaImage::new(2, 2);
        assert!(matches!(
            merge_overlay(&base, &overlay),
            Err(StudioError::Configuration(_))
        ));
    }
}
