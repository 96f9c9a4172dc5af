use tracing::instrument;

use crate::{cluster::Cluster, util::median};

const EPSILON: f32 = 1e-6;
const HEIGHT_EXPONENT: f32 = 1.5;

/// Scores a cluster by the summed area of its members, their mean confidence and a
/// super-linear boost for lettering taller than `global_median_height`.
///
/// Member areas are summed rather than taking the envelope so that a sparse block with a
/// large bounding box does not beat several substantial lines.
#[instrument(level = "trace", skip(cluster), fields(members = cluster.members().len()))]
pub fn score(cluster: &Cluster<'_>, global_median_height: f32) -> f32 {
    let members = cluster.members();
    if members.is_empty() {
        return 0.0;
    }
    let total_area = members.iter().map(|member| member.area).sum::<f32>();
    let mean_confidence =
        members.iter().map(|member| member.confidence).sum::<f32>() / members.len() as f32;
    let heights = members.iter().map(|member| member.height).collect::<Vec<_>>();
    let height_boost = (median(&heights) / (global_median_height + EPSILON)).powf(HEIGHT_EXPONENT);
    total_area * mean_confidence * height_boost
}
