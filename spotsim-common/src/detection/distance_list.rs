/// One integer offset from a centre pixel with its Euclidean length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub drow: isize,
    pub dcol: isize,
    pub distance: f64,
}

/// All integer offsets inside a disk of radius `radius`, nearest first.
///
/// Built once per radius and shared read-only between every pixel of every frame
/// that is searched with it.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceList {
    radius: usize,
    offsets: Vec<Offset>,
}

impl DistanceList {
    pub fn build(radius: usize) -> Self {
        let r = radius as isize;
        let mut offsets = Vec::with_capacity((2 * radius + 1).pow(2));
        for drow in -r..=r {
            for dcol in -r..=r {
                let distance = ((drow * drow + dcol * dcol) as f64).sqrt();
                if distance <= radius as f64 {
                    offsets.push(Offset { drow, dcol, distance });
                }
            }
        }
        // Stable, so ties keep scan order
        offsets.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        DistanceList { radius, offsets }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Offset> {
        self.offsets.iter()
    }
}

impl<'a> IntoIterator for &'a DistanceList {
    type Item = &'a Offset;
    type IntoIter = std::slice::Iter<'a, Offset>;

    fn into_iter(self) -> Self::IntoIter {
        self.offsets.iter()
    }
}
