use crate::types::{PixelBounds, PixelMask};
use serde::{Deserialize, Serialize};

/// Pixel adjacency rule used when grouping flagged pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbors only
    Four,
    /// Edge and corner neighbors
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(i32, i32)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
}

/// A maximal group of adjacent flagged pixels
#[derive(Debug, Clone)]
pub struct Component {
    /// Member pixels as (row, col), in discovery order
    pub pixels: Vec<(usize, usize)>,
    pub bounds: PixelBounds,
}

impl Component {
    /// Unweighted centroid as fractional (row, col)
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.pixels.len() as f64;
        let (sum_r, sum_c) = self
            .pixels
            .iter()
            .fold((0.0f64, 0.0f64), |(sr, sc), &(r, c)| {
                (sr + r as f64, sc + c as f64)
            });
        (sum_r / n, sum_c / n)
    }
}

/// Group flagged pixels (mask != 0) into connected components.
///
/// Components are returned in row-major order of their first-scanned pixel,
/// so repeated calls on the same mask produce the same labeling.
pub fn label_components(mask: &PixelMask, connectivity: Connectivity) -> Vec<Component> {
    let (rows, cols) = mask.dim();
    let mut visited = vec![false; rows * cols];
    let mut components = Vec::new();
    let mut queue: Vec<(usize, usize)> = Vec::new();

    for seed_row in 0..rows {
        for seed_col in 0..cols {
            let idx = seed_row * cols + seed_col;
            if mask[[seed_row, seed_col]] == 0 || visited[idx] {
                continue;
            }

            // Flood fill from this seed
            visited[idx] = true;
            queue.clear();
            queue.push((seed_row, seed_col));
            let mut pixels = Vec::new();
            let mut bounds = PixelBounds {
                min_row: seed_row,
                min_col: seed_col,
                max_row: seed_row,
                max_col: seed_col,
            };

            while let Some((row, col)) = queue.pop() {
                pixels.push((row, col));
                bounds.min_row = bounds.min_row.min(row);
                bounds.min_col = bounds.min_col.min(col);
                bounds.max_row = bounds.max_row.max(row);
                bounds.max_col = bounds.max_col.max(col);

                for &(dr, dc) in connectivity.offsets() {
                    let nr = row as i32 + dr;
                    let nc = col as i32 + dc;
                    if nr < 0 || nr >= rows as i32 || nc < 0 || nc >= cols as i32 {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    let nidx = nr * cols + nc;
                    if mask[[nr, nc]] != 0 && !visited[nidx] {
                        visited[nidx] = true;
                        queue.push((nr, nc));
                    }
                }
            }

            components.push(Component { pixels, bounds });
        }
    }

    components
}
