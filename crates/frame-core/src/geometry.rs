use frame_pool::FrameShape;

/// Camera mounting orientation, applied to every frame before it reaches the
/// buffer pool. 90/270 swap height and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn from_degrees(deg: i32) -> Option<Self> {
        match ((deg % 360) + 360) % 360 {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    /// The shape a frame of `shape` becomes after this rotation is applied.
    pub fn rotated_shape(self, shape: FrameShape) -> FrameShape {
        match self {
            Orientation::Deg0 | Orientation::Deg180 => shape,
            Orientation::Deg90 | Orientation::Deg270 => {
                FrameShape::new(shape.width, shape.height, shape.channels)
            }
        }
    }

    /// Rotate raw `(height, width, channels)` pixel data. Returns a new
    /// buffer; `src` is unmodified.
    pub fn apply(self, src: &[u8], shape: FrameShape) -> Vec<u8> {
        let (h, w, c) = (shape.height as usize, shape.width as usize, shape.channels as usize);
        debug_assert_eq!(src.len(), h * w * c);

        match self {
            Orientation::Deg0 => src.to_vec(),
            Orientation::Deg180 => {
                let mut out = vec![0u8; src.len()];
                for y in 0..h {
                    for x in 0..w {
                        let src_off = (y * w + x) * c;
                        let dst_y = h - 1 - y;
                        let dst_x = w - 1 - x;
                        let dst_off = (dst_y * w + dst_x) * c;
                        out[dst_off..dst_off + c].copy_from_slice(&src[src_off..src_off + c]);
                    }
                }
                out
            }
            Orientation::Deg90 => {
                // (h, w) -> (w, h): dst[x][h-1-y] = src[y][x]
                let mut out = vec![0u8; src.len()];
                for y in 0..h {
                    for x in 0..w {
                        let src_off = (y * w + x) * c;
                        let dst_y = x;
                        let dst_x = h - 1 - y;
                        let dst_off = (dst_y * h + dst_x) * c;
                        out[dst_off..dst_off + c].copy_from_slice(&src[src_off..src_off + c]);
                    }
                }
                out
            }
            Orientation::Deg270 => {
                // (h, w) -> (w, h): dst[w-1-x][y] = src[y][x]
                let mut out = vec![0u8; src.len()];
                for y in 0..h {
                    for x in 0..w {
                        let src_off = (y * w + x) * c;
                        let dst_y = w - 1 - x;
                        let dst_x = y;
                        let dst_off = (dst_y * h + dst_x) * c;
                        out[dst_off..dst_off + c].copy_from_slice(&src[src_off..src_off + c]);
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(h: usize, w: usize, c: usize) -> (Vec<u8>, FrameShape) {
        let mut data = vec![0u8; h * w * c];
        for i in 0..data.len() {
            data[i] = (i % 251) as u8;
        }
        (data, FrameShape::new(h as u32, w as u32, c as u8))
    }

    #[test]
    fn deg0_is_identity() {
        let (data, shape) = sample(3, 5, 3);
        assert_eq!(Orientation::Deg0.apply(&data, shape), data);
    }

    #[test]
    fn deg90_then_deg270_is_identity() {
        let (data, shape) = sample(3, 5, 3);
        let rotated = Orientation::Deg90.apply(&data, shape);
        let rotated_shape = Orientation::Deg90.rotated_shape(shape);
        let back = Orientation::Deg270.apply(&rotated, rotated_shape);
        assert_eq!(back, data);
    }

    #[test]
    fn deg180_twice_is_identity() {
        let (data, shape) = sample(4, 4, 1);
        let once = Orientation::Deg180.apply(&data, shape);
        let twice = Orientation::Deg180.apply(&once, shape);
        assert_eq!(twice, data);
    }

    #[test]
    fn rotated_shape_swaps_dimensions_for_90_270() {
        let shape = FrameShape::new(480, 640, 3);
        let rotated = Orientation::Deg90.rotated_shape(shape);
        assert_eq!(rotated.height, 640);
        assert_eq!(rotated.width, 480);
    }
}
