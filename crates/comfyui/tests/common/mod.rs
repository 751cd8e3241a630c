#![allow(dead_code)]

use image::codecs::png::PngEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};

/// A solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 120, 220]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(PngEncoder::new(&mut bytes))
        .expect("encode test png");
    bytes
}

/// A history entry whose `SaveImage` node produced the given files.
pub fn entry_with_images(node_id: &str, filenames: &[&str]) -> Value {
    let images: Vec<Value> = filenames
        .iter()
        .map(|f| json!({ "filename": f, "subfolder": "", "type": "output" }))
        .collect();
    json!({
        "outputs": { node_id: { "images": images } },
        "status": { "status_str": "success", "completed": true, "messages": [] }
    })
}

/// Minimal graph that passes the structure check.
pub fn workflow() -> Value {
    json!({
        "3": { "class_type": "KSampler", "inputs": { "seed": 42, "steps": 20 } },
        "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } },
        "10": { "class_type": "UNETLoader", "inputs": {} },
        "11": { "class_type": "CLIPLoader", "inputs": {} },
        "12": { "class_type": "VAELoader", "inputs": {} }
    })
}
