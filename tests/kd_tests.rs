use std::io::Cursor;

use image::imageops::{rotate180, rotate270, rotate90};
use image::{GrayImage, ImageFormat};
use rand::prelude::*;
use test_case::test_case;

use kdcode::{
    decode, decode_with_model, encode, CodeParameters, CorrectionModel, Decoded, KDBuilder,
    KDError, ScanParameters,
};

fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn scan(segments: u32) -> ScanParameters {
    ScanParameters { segments_per_ring: segments, ..Default::default() }
}

// Round trips
//------------------------------------------------------------------------------

#[test_case("HI", 16; "hi_16")]
#[test_case("HI", 8; "hi_8")]
#[test_case("HI", 32; "hi_32")]
#[test_case("A", 16; "single_char")]
#[test_case("KD-Code rocks", 16; "multi_ring")]
#[test_case("Hello, KD-Code!", 16; "resized_working_surface")]
#[test_case("a\tb\nc", 16; "mapped_control_chars")]
fn test_round_trip(text: &str, segments: u32) {
    let bytes = KDBuilder::new(text).segments_per_ring(segments).build().unwrap().png_bytes().unwrap();
    let decoded = decode(&bytes, &scan(segments)).unwrap();
    assert_eq!(decoded, Decoded::Found(text.into()), "segments {segments}");
}

#[test]
fn test_round_trip_under_rotation() {
    let img = KDBuilder::new("HI").build().unwrap().to_image();
    for rotated in [rotate90(&img), rotate180(&img), rotate270(&img)] {
        let decoded = decode(&png_bytes(&rotated), &scan(16)).unwrap();
        assert_eq!(decoded, Decoded::Found("HI".into()));
    }
}

#[test]
fn test_round_trip_jpeg_compression() {
    let bytes = KDBuilder::new("KD").build().unwrap().jpeg_bytes(85).unwrap();
    let decoded = decode(&bytes, &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::Found("KD".into()));
}

#[test]
fn test_round_trip_with_sensor_noise() {
    let mut img = KDBuilder::new("HI").build().unwrap().to_image();
    let mut rng = StdRng::seed_from_u64(99);
    for p in img.pixels_mut() {
        let noisy = p[0] as i16 + rng.random_range(-25..=25);
        p[0] = noisy.clamp(0, 255) as u8;
    }
    let decoded = decode(&png_bytes(&img), &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::Found("HI".into()));
}

#[test]
fn test_all_zero_payload_reads_empty() {
    // A NUL-only payload draws no wedges and self-terminates on decode
    let bytes = KDBuilder::new("\0").build().unwrap().png_bytes().unwrap();
    let decoded = decode(&bytes, &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::Found(String::new()));
}

// No code present
//------------------------------------------------------------------------------

#[test]
fn test_decode_noise_image() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut img = GrayImage::new(320, 240);
    for p in img.pixels_mut() {
        p[0] = rng.random();
    }
    let decoded = decode(&png_bytes(&img), &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::NotFound);
}

#[test]
fn test_decode_blank_image() {
    let img = GrayImage::from_pixel(400, 400, image::Luma([255]));
    let decoded = decode(&png_bytes(&img), &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::NotFound);
}

#[test]
fn test_decode_garbage_bytes() {
    let decoded = decode(&[0xde, 0xad, 0xbe, 0xef], &scan(16)).unwrap();
    assert_eq!(decoded, Decoded::NotFound);
}

// Concurrency and models
//------------------------------------------------------------------------------

#[test]
fn test_multithreaded_decode_matches_sequential() {
    let bytes =
        KDBuilder::new("Hello, KD-Code!").build().unwrap().png_bytes().unwrap();
    let seq = decode(&bytes, &scan(16)).unwrap();
    let par = decode(
        &bytes,
        &ScanParameters { enable_multithreading: true, ..Default::default() },
    )
    .unwrap();
    assert_eq!(seq, par);
    assert!(seq.is_found());
}

#[test]
fn test_decode_with_trained_model() {
    let model = CorrectionModel::train_synthetic(20_000, 42);
    let bytes = KDBuilder::new("HI").build().unwrap().png_bytes().unwrap();

    let with_model = decode_with_model(&bytes, &scan(16), Some(&model)).unwrap();
    let without = decode_with_model(&bytes, &scan(16), None).unwrap();
    assert_eq!(with_model, Decoded::Found("HI".into()));
    assert_eq!(with_model, without);
}

// Validation surface
//------------------------------------------------------------------------------

#[test]
fn test_encode_validation() {
    let params = CodeParameters::default();
    assert_eq!(encode("", &params), Err(KDError::EmptyText));

    let long = "A".repeat(1000);
    assert_eq!(encode(&long, &params), Err(KDError::TextTooLong(1000, 128)));

    let params = CodeParameters { segments_per_ring: 15, ..Default::default() };
    assert_eq!(encode("TEST", &params), Err(KDError::InvalidSegmentCount(15)));

    let params = CodeParameters { anchor_radius: 0, ..Default::default() };
    assert_eq!(encode("TEST", &params), Err(KDError::NonPositiveParameter("anchor_radius")));
}

#[test]
fn test_scan_validation() {
    let bytes = KDBuilder::new("HI").build().unwrap().png_bytes().unwrap();

    let params = ScanParameters { min_anchor_radius: 0, ..Default::default() };
    assert_eq!(decode(&bytes, &params), Err(KDError::NonPositiveParameter("min_anchor_radius")));

    let params =
        ScanParameters { min_anchor_radius: 80, max_anchor_radius: 80, ..Default::default() };
    assert_eq!(decode(&bytes, &params), Err(KDError::InvalidAnchorRange(80, 80)));
}

#[test]
fn test_encode_is_deterministic() {
    let params = CodeParameters::default();
    assert_eq!(encode("Determinism", &params).unwrap(), encode("Determinism", &params).unwrap());
}

// Pure codec property
//------------------------------------------------------------------------------

mod codec_proptests {
    use proptest::prelude::*;
    use proptest::string::string_regex;

    use kdcode::{decode, Decoded, KDBuilder, ScanParameters};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        // Any printable text that fits a handful of rings survives the
        // full encode/decode pipeline exactly
        #[test]
        fn proptest_full_round_trip(text in string_regex("[ -~]{1,8}").unwrap()) {
            let bytes = KDBuilder::new(&text).build().unwrap().png_bytes().unwrap();
            let decoded = decode(&bytes, &ScanParameters::default()).unwrap();
            prop_assert_eq!(decoded, Decoded::Found(text));
        }
    }
}
