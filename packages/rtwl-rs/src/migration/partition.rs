/// Assignment of grid points to region workers.
///
/// Points are split into contiguous runs; the first `npts % n` regions get
/// one extra point. Regions may be empty when there are more regions than
/// points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPartition {
    regions: Vec<Vec<usize>>,
    region_of: Vec<usize>,
}

impl RegionPartition {
    pub fn split(npts: usize, number_of_regions: usize) -> Self {
        let n = number_of_regions.max(1);
        let base = npts / n;
        let extra = npts % n;

        let mut regions = Vec::with_capacity(n);
        let mut region_of = vec![0; npts];
        let mut next = 0usize;
        for region in 0..n {
            let size = base + usize::from(region < extra);
            let points: Vec<usize> = (next..next + size).collect();
            for &p in &points {
                region_of[p] = region;
            }
            regions.push(points);
            next += size;
        }

        Self { regions, region_of }
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn points(&self, region: usize) -> &[usize] {
        self.regions.get(region).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn region_of(&self, point: usize) -> Option<usize> {
        self.region_of.get(point).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_like_array_split() {
        let partition = RegionPartition::split(10, 3);
        assert_eq!(partition.len(), 3);
        assert_eq!(partition.points(0), &[0, 1, 2, 3]);
        assert_eq!(partition.points(1), &[4, 5, 6]);
        assert_eq!(partition.points(2), &[7, 8, 9]);
        assert_eq!(partition.region_of(5), Some(1));
        assert_eq!(partition.region_of(10), None);
    }

    #[test]
    fn test_more_regions_than_points() {
        let partition = RegionPartition::split(2, 4);
        assert_eq!(partition.points(0), &[0]);
        assert_eq!(partition.points(1), &[1]);
        assert!(partition.points(2).is_empty());
        assert!(partition.points(7).is_empty());
    }

    #[test]
    fn test_every_point_owned_once() {
        let partition = RegionPartition::split(101, 7);
        let mut all: Vec<usize> = (0..7).flat_map(|r| partition.points(r).to_vec()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..101).collect::<Vec<_>>());
    }
}
