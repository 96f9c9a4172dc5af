use geo::{Coord, EuclideanDistance, Point};
use tracing::instrument;

use crate::{util::median, DetectionRecord};

/// Detections judged to form one visual text block.
#[derive(Debug, Clone)]
pub struct Cluster<'a> {
    members: Vec<&'a DetectionRecord>,
    center: Coord<f32>,
    avg_height: f32,
}

impl<'a> Cluster<'a> {
    fn new(record: &'a DetectionRecord) -> Self {
        Self {
            members: vec![record],
            center: record.center(),
            avg_height: record.height,
        }
    }

    fn push(&mut self, record: &'a DetectionRecord) {
        self.members.push(record);
        self.recompute();
    }

    // Always from the full member set so repeated joins cannot drift.
    fn recompute(&mut self) {
        let len = self.members.len() as f32;
        self.center = self
            .members
            .iter()
            .fold(Coord::zero(), |sum, member| sum + member.center())
            / len;
        let heights = self
            .members
            .iter()
            .map(|member| member.height)
            .collect::<Vec<_>>();
        self.avg_height = median(&heights);
    }

    pub fn members(&self) -> &[&'a DetectionRecord] {
        &self.members
    }

    pub fn center(&self) -> Coord<f32> {
        self.center
    }

    /// Median height of the members.
    pub fn avg_height(&self) -> f32 {
        self.avg_height
    }

    fn accepts(&self, record: &DetectionRecord, distance_ratio: f32) -> bool {
        let distance = Point::from(self.center).euclidean_distance(&Point::from(record.center()));
        distance <= distance_ratio * record.height.max(self.avg_height)
    }
}

/// Greedy single pass over `records` in the given order. Each record joins the first
/// cluster (in creation order) whose center lies within `distance_ratio` times the larger
/// of the record height and the cluster's median height, or starts a new one.
#[instrument(level = "debug", skip(records), fields(records = records.len()))]
pub fn cluster_lines<'a>(records: &[&'a DetectionRecord], distance_ratio: f32) -> Vec<Cluster<'a>> {
    let mut clusters: Vec<Cluster<'a>> = Vec::new();
    for &record in records {
        match clusters
            .iter_mut()
            .find(|cluster| cluster.accepts(record, distance_ratio))
        {
            Some(cluster) => cluster.push(record),
            None => clusters.push(Cluster::new(record)),
        }
    }
    log::debug!("Grouped {} records into {} clusters", records.len(), clusters.len());
    clusters
}
