//! Interop with `image::GrayImage` (feature `image`).

use scandium_core::{Frame, GrayImage, GrayImageView, Timestamp};

/// Borrow an `image::GrayImage` as the core view type.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Take ownership of a captured `image::GrayImage` as a [`Frame`].
pub fn frame_from_image(img: ::image::GrayImage, timestamp: Timestamp, seq: u64) -> Frame {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let image = GrayImage {
        width,
        height,
        data: img.into_raw(),
    };
    Frame::new(image, timestamp, seq)
}

/// Luma conversion for color captures.
pub fn frame_from_dynamic(img: &::image::DynamicImage, timestamp: Timestamp, seq: u64) -> Frame {
    frame_from_image(img.to_luma8(), timestamp, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_layout() {
        let mut img = ::image::GrayImage::new(4, 3);
        img.put_pixel(3, 2, ::image::Luma([200]));
        let view = gray_view(&img);
        assert_eq!((view.width, view.height), (4, 3));
        assert_eq!(view.get(3, 2), 200);

        let frame = frame_from_image(img, Timestamp(7), 1);
        assert_eq!(frame.view().get(3, 2), 200);
        assert_eq!(frame.timestamp, Timestamp(7));
    }
}
