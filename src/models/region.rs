use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Named rectangle in the canonical resolution, stored as corner bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, String> {
        if x2 <= x1 {
            return Err("x2 must be greater than x1".to_string());
        }
        if y2 <= y1 {
            return Err("y2 must be greater than y1".to_string());
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// True when the rectangle fits inside a frame of the given dimensions.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.x2 <= width && self.y2 <= height
    }
}

/// On-disk shape of the coordinate map file.
#[derive(Debug, Deserialize)]
struct RegionMapFile {
    resolution: String,
    regions: HashMap<String, [u32; 4]>,
}

/// Mapping from semantic region name to a rectangle in the canonical
/// resolution. Loaded once from external configuration; immutable thereafter.
#[derive(Debug, Clone)]
pub struct RegionMap {
    resolution: (u32, u32),
    regions: HashMap<String, Region>,
}

impl RegionMap {
    /// Load from JSON: `{"resolution": "1280x720", "regions": {"name": [x1,y1,x2,y2]}}`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read region map {:?}: {}", path.as_ref(), e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        let file: RegionMapFile =
            serde_json::from_str(content).map_err(|e| format!("Invalid region map: {}", e))?;

        let resolution = parse_resolution(&file.resolution)?;

        let mut regions = HashMap::new();
        for (name, [x1, y1, x2, y2]) in file.regions {
            let region = Region::new(x1, y1, x2, y2)
                .map_err(|e| format!("Region '{}' is degenerate: {}", name, e))?;
            if !region.fits(resolution.0, resolution.1) {
                return Err(format!(
                    "Region '{}' exceeds canonical resolution {}x{}",
                    name, resolution.0, resolution.1
                ));
            }
            regions.insert(name, region);
        }

        Ok(Self { resolution, regions })
    }

    /// Build directly from parts, for embedding and tests.
    pub fn with_regions(resolution: (u32, u32), regions: HashMap<String, Region>) -> Self {
        Self { resolution, regions }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

fn parse_resolution(text: &str) -> Result<(u32, u32), String> {
    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| format!("Resolution must look like WxH, got '{}'", text))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("Bad width in '{}'", text))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("Bad height in '{}'", text))?;
    if width == 0 || height == 0 {
        return Err(format!("Resolution must be nonzero, got '{}'", text));
    }
    Ok((width, height))
}
