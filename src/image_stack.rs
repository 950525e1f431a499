use anyhow::{Context, Result};
use image::{ImageBuffer, Luma};
use log::{error, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use spotsim_common::OutputConfig;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Index;
use std::path::{Path, PathBuf};

/// A fixed-size stack of 16-bit frames, each shaped `(height, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
    width: usize,
    height: usize,
    frames: Vec<Array2<u16>>,
}

/// On-disk layout for the serde output formats. Pixels are row-major, frame after frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct StackFile {
    pub width: usize,
    pub height: usize,
    pub num_frames: usize,
    pub pixels: Vec<u16>,
}

impl ImageStack {
    /// Allocates `num_frames` zeroed frames.
    pub fn initialise(num_frames: usize, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Frame dimensions must be positive (got {}x{}).", width, height);
        }
        Ok(Self {
            width,
            height,
            frames: vec![Array2::zeros((height, width)); num_frames],
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Array2<u16>] {
        &self.frames
    }

    /// Stores one frame, which must match the stack's frame shape.
    pub fn set_frame(&mut self, index: usize, frame: Array2<u16>) -> Result<()> {
        if frame.dim() != (self.height, self.width) {
            anyhow::bail!(
                "Frame {} has shape {:?}, stack expects {:?}.",
                index,
                frame.dim(),
                (self.height, self.width)
            );
        }
        let num_frames = self.frames.len();
        let slot = self
            .frames
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("Frame index {} out of range for {} frames.", index, num_frames))?;
        *slot = frame;
        Ok(())
    }

    /// Sum of all pixel values in one frame, `None` past the last frame.
    pub fn frame_sum(&self, index: usize) -> Option<u64> {
        self.frames.get(index).map(|f| f.iter().map(|&v| v as u64).sum())
    }

    fn to_stack_file(&self) -> StackFile {
        StackFile {
            width: self.width,
            height: self.height,
            num_frames: self.frames.len(),
            pixels: self.frames.iter().flat_map(|f| f.iter().copied()).collect(),
        }
    }

    /// Persists the stack in `output.stack_format`. Returns the files written.
    pub fn write(&self, output: &OutputConfig) -> Result<Vec<PathBuf>> {
        let base = &output.base_filename;
        if let Some(parent) = Path::new(base).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        match output.stack_format.as_str() {
            "png" => self.write_png_frames(base),
            "bincode" => {
                let filename = PathBuf::from(format!("{}_stack.bin", base));
                let file = File::create(&filename)
                    .with_context(|| format!("Error creating stack file '{}'", filename.display()))?;
                bincode::serialize_into(BufWriter::new(file), &self.to_stack_file())
                    .context("Error serializing stack to bincode")?;
                info!("Image stack saved to {} (binary format)", filename.display());
                Ok(vec![filename])
            }
            "messagepack" => {
                let filename = PathBuf::from(format!("{}_stack.msgpack", base));
                let file = File::create(&filename)
                    .with_context(|| format!("Error creating stack file '{}'", filename.display()))?;
                rmp_serde::encode::write(&mut BufWriter::new(file), &self.to_stack_file())
                    .context("Error serializing stack to MessagePack")?;
                info!("Image stack saved to {} (MessagePack format)", filename.display());
                Ok(vec![filename])
            }
            "json" => self.write_json(base),
            other => {
                error!("Unknown stack format: {}. Using JSON instead.", other);
                self.write_json(base)
            }
        }
    }

    fn write_json(&self, base: &str) -> Result<Vec<PathBuf>> {
        let filename = PathBuf::from(format!("{}_stack.json", base));
        let json_string =
            serde_json::to_string(&self.to_stack_file()).context("Error serializing stack to JSON")?;
        let mut file = File::create(&filename)
            .with_context(|| format!("Error creating stack file '{}'", filename.display()))?;
        file.write_all(json_string.as_bytes())?;
        info!("Image stack saved to {} ({}MB)", filename.display(), json_string.len() / 1_048_576);
        Ok(vec![filename])
    }

    // One 16-bit grayscale PNG per frame
    fn write_png_frames(&self, base: &str) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.frames.len());
        for (index, frame) in self.frames.iter().enumerate() {
            let filename = PathBuf::from(format!("{}_frame_{:05}.png", base, index));
            let pixels: Vec<u16> = frame.iter().copied().collect();
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(self.width as u32, self.height as u32, pixels)
                    .ok_or_else(|| anyhow::anyhow!("Frame {} buffer does not match its dimensions", index))?;
            img.save(&filename)
                .with_context(|| format!("Failed to save frame to {}", filename.display()))?;
            written.push(filename);
        }
        info!("Image stack saved as {} PNG frames ({}_frame_*.png)", written.len(), base);
        Ok(written)
    }
}

impl Index<usize> for ImageStack {
    type Output = Array2<u16>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.frames[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn output_config(dir: &TempDir, format: &str) -> OutputConfig {
        OutputConfig {
            base_filename: dir.path().join("run").to_string_lossy().into_owned(),
            stack_format: format.to_string(),
            save_trajectories: false,
        }
    }

    fn sample_stack() -> ImageStack {
        let mut stack = ImageStack::initialise(2, 5, 3).unwrap();
        for index in 0..2 {
            let frame = Array2::from_shape_fn((3, 5), |(y, x)| (100 * index + 10 * y + x) as u16);
            stack.set_frame(index, frame).unwrap();
        }
        stack
    }

    #[test]
    fn test_initialise_zeroed() {
        let stack = ImageStack::initialise(3, 8, 4).unwrap();
        assert_eq!(stack.num_frames(), 3);
        assert_eq!(stack[2].dim(), (4, 8));
        assert_eq!(stack.frame_sum(1), Some(0));
        assert_eq!(stack.frame_sum(3), None);
    }

    #[test]
    fn test_initialise_rejects_empty_frames() {
        assert!(ImageStack::initialise(3, 0, 4).is_err());
        assert!(ImageStack::initialise(3, 4, 0).is_err());
    }

    #[test]
    fn test_set_frame_checks() {
        let mut stack = ImageStack::initialise(2, 4, 4).unwrap();
        assert!(stack.set_frame(0, Array2::zeros((4, 5))).is_err());
        assert!(stack.set_frame(2, Array2::zeros((4, 4))).is_err());
        stack.set_frame(1, Array2::from_elem((4, 4), 3)).unwrap();
        assert_eq!(stack.frame_sum(1), Some(48));
    }

    #[test]
    fn test_write_png_frames() {
        let dir = TempDir::new().unwrap();
        let stack = sample_stack();
        let files = stack.write(&output_config(&dir, "png")).unwrap();
        assert_eq!(files.len(), 2);

        let img = image::open(&files[1]).unwrap().to_luma16();
        assert_eq!(img.dimensions(), (5, 3));
        assert_eq!(img.get_pixel(4, 2).0[0], 124);
    }

    #[test]
    fn test_write_bincode_round_trip() {
        let dir = TempDir::new().unwrap();
        let stack = sample_stack();
        let files = stack.write(&output_config(&dir, "bincode")).unwrap();

        let bytes = fs::read(&files[0]).unwrap();
        let decoded: StackFile = bincode::deserialize(&bytes).unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.num_frames), (5, 3, 2));
        assert_eq!(decoded.pixels.len(), 30);
        assert_eq!(decoded.pixels[15], 100);
    }

    #[test]
    fn test_unknown_format_falls_back_to_json() {
        let dir = TempDir::new().unwrap();
        let files = sample_stack().write(&output_config(&dir, "tiff")).unwrap();
        assert!(files[0].to_string_lossy().ends_with("_stack.json"));

        let decoded: StackFile = serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(decoded.pixels[29], 124);
    }
}
