use dicom_core::Tag;
use dicom_object::InMemDicomObject;

// Image Pixel Module attributes read by the decoder
pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag(0x0028, 0x0101);
pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

// Native little endian transfer syntaxes
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Trimmed text of an attribute, `None` when absent or not textual
pub fn get_string_value(dcm: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = dcm.element(tag).ok()?;
    let text = element.to_str().ok()?;
    Some(text.trim().to_string())
}

/// Unsigned short attribute such as `Rows` or `BitsAllocated`
pub fn get_u16_value(dcm: &InMemDicomObject, tag: Tag) -> Option<u16> {
    dcm.element(tag).ok()?.to_int::<u16>().ok()
}
