//! 16-bit 5-6-5 color packing for embedded displays

use image::RgbImage;
use std::fmt::Write;

use crate::core::constants::HEADER_VALUES_PER_LINE;

/// Packs one color: red in the top 5 bits, green in the middle 6, blue in
/// the low 5, keeping each channel's most significant bits.
#[inline]
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Packs every pixel, row-major
pub fn encode_rgb565(image: &RgbImage) -> Vec<u16> {
    image.pixels().map(|p| rgb565(p[0], p[1], p[2])).collect()
}

/// C header declaring `bg_w`, `bg_h` and the `bg565` PROGMEM array
pub fn rgb565_header(image: &RgbImage) -> String {
    let (w, h) = image.dimensions();
    let pixels = encode_rgb565(image);

    // "0xABCD, " per value plus line overhead
    let mut out = String::with_capacity(pixels.len() * 8 + 256);
    out.push_str("#pragma once\n");
    out.push_str("#include <stdint.h>\n");
    out.push_str("#include <pgmspace.h>\n\n");
    let _ = writeln!(out, "static const uint16_t bg_w = {w};");
    let _ = writeln!(out, "static const uint16_t bg_h = {h};\n");
    let _ = writeln!(out, "static const uint16_t bg565[{}] PROGMEM = {{", pixels.len());

    for chunk in pixels.chunks(HEADER_VALUES_PER_LINE) {
        let values: Vec<String> = chunk.iter().map(|v| format!("0x{v:04X}")).collect();
        let _ = writeln!(out, "  {},", values.join(", "));
    }

    out.push_str("};\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_primary_colors_pack_into_their_fields() {
        assert_eq!(rgb565(255, 0, 0), 0xF800);
        assert_eq!(rgb565(0, 255, 0), 0x07E0);
        assert_eq!(rgb565(0, 0, 255), 0x001F);
        assert_eq!(rgb565(255, 255, 255), 0xFFFF);
        assert_eq!(rgb565(0, 0, 0), 0x0000);
    }

    #[test]
    fn test_low_bits_are_dropped() {
        assert_eq!(rgb565(0x07, 0x03, 0x07), 0);
        assert_eq!(rgb565(0x08, 0x04, 0x08), 0x0821);
        assert_eq!(rgb565(240, 240, 240), 0xF79E);
    }

    #[test]
    fn test_encode_is_row_major() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));
        img.put_pixel(0, 1, Rgb([0, 0, 255]));
        assert_eq!(encode_rgb565(&img), vec![0x0000, 0xF800, 0x001F, 0x0000]);
    }

    #[test]
    fn test_header_layout() {
        let img = RgbImage::from_pixel(5, 3, Rgb([255, 0, 0]));
        let header = rgb565_header(&img);
        let lines: Vec<&str> = header.lines().collect();

        assert_eq!(lines[0], "#pragma once");
        assert!(header.contains("static const uint16_t bg_w = 5;"));
        assert!(header.contains("static const uint16_t bg_h = 3;"));
        assert!(header.contains("static const uint16_t bg565[15] PROGMEM = {"));

        // 15 values: one full line of 12, then 3
        let rows: Vec<&&str> = lines.iter().filter(|l| l.starts_with("  0x")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].matches("0xF800").count(), 12);
        assert_eq!(*rows[1], "  0xF800, 0xF800, 0xF800,");
        assert_eq!(*lines.last().unwrap(), "};");
    }
}
