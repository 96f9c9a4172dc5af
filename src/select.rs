use float_ord::FloatOrd;
use tracing::instrument;

use crate::{
    cluster::{cluster_lines, Cluster},
    score::score,
    util::{envelope, median, polygon_area, quantile},
    DetectionRecord, Selection, SelectionOptions,
};

/// Reduces every detection of an image to the one label that dominates it visually.
///
/// Returns `None` only when `records` is empty.
#[instrument(level = "debug", skip(records), fields(records = records.len()))]
pub fn select_predominant(
    records: &[DetectionRecord],
    options: &SelectionOptions,
) -> Option<Selection> {
    if records.is_empty() {
        return None;
    }

    let mut candidates = records
        .iter()
        .filter(|record| record.confidence >= options.min_confidence)
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        log::debug!(
            "No record reached confidence {}, keeping all {}",
            options.min_confidence,
            records.len()
        );
        candidates = records.iter().collect();
    }

    let heights = candidates.iter().map(|record| record.height).collect::<Vec<_>>();
    let median_height = median(&heights);
    let tallest = first_max_by(&candidates, |record| record.height)?;
    if tallest.height > options.dominant_height_ratio * median_height {
        log::debug!(
            "Dominant line {:?} (height {} vs median {median_height})",
            tallest.text,
            tallest.height
        );
        return Some(Selection::from_record(tallest));
    }

    let cutoff = quantile(&heights, options.height_quantile);
    let tall = candidates
        .into_iter()
        .filter(|record| record.height >= cutoff)
        .collect::<Vec<_>>();
    log::trace!("{} records at or above height {cutoff}", tall.len());

    let clusters = cluster_lines(&tall, options.cluster_distance_ratio);
    if clusters.is_empty() {
        return first_max_by(&tall, |record| record.height * record.confidence)
            .map(Selection::from_record);
    }

    let tall_heights = tall.iter().map(|record| record.height).collect::<Vec<_>>();
    let global_median_height = median(&tall_heights);
    let (best, best_score) = clusters
        .iter()
        .map(|cluster| (cluster, score(cluster, global_median_height)))
        .reduce(|best, next| if FloatOrd(next.1) > FloatOrd(best.1) { next } else { best })?;
    log::debug!(
        "Picked cluster of {} lines out of {} with score {best_score}",
        best.members().len(),
        clusters.len()
    );
    Some(assemble(best, best_score))
}

fn first_max_by<'a>(
    records: &[&'a DetectionRecord],
    key: impl Fn(&DetectionRecord) -> f32,
) -> Option<&'a DetectionRecord> {
    records
        .iter()
        .rev()
        .max_by_key(|&&record| FloatOrd(key(record)))
        .copied()
}

fn assemble(cluster: &Cluster<'_>, score: f32) -> Selection {
    let mut members = cluster.members().to_vec();
    members.sort_by_key(|member| FloatOrd(member.top));
    let text = members
        .iter()
        .map(|member| member.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence =
        members.iter().map(|member| member.confidence).sum::<f32>() / members.len() as f32;
    let bounds = envelope(members.iter().map(|member| member.bounds.as_slice())).to_vec();
    Selection {
        text,
        confidence,
        area: polygon_area(&bounds),
        bounds,
        score,
        line_count: members.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> DetectionRecord {
        DetectionRecord::new(
            text,
            confidence,
            vec![[x, y], [x + w, y], [x + w, y + h], [x, y + h]],
        )
    }

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn empty_input_has_no_selection() {
        assert!(select_predominant(&[], &SelectionOptions::default()).is_none());
    }

    #[test]
    fn dominant_line_short_circuits() {
        let records = vec![
            line("small a", 0.9, 0.0, 0.0, 50.0, 10.0),
            line("small b", 0.9, 0.0, 20.0, 50.0, 10.0),
            line("small c", 0.9, 0.0, 40.0, 50.0, 10.0),
            line("BIG", 0.9, 0.0, 100.0, 80.0, 30.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "BIG");
        assert_eq!(selection.line_count, 1);
        assert_close(selection.score, 27.0);
        assert_close(selection.area, 2400.0);
        assert_eq!(selection.bounds, records[3].bounds);
    }

    #[test]
    fn stacked_heading_beats_footer() {
        // Engine order is bottom-up to check that assembly sorts by vertical position.
        let records = vec![
            line("B", 0.9, 0.0, 11.0, 12.0, 11.0),
            line("A", 0.8, 0.0, 0.0, 10.0, 10.0),
            line("footer", 0.95, 0.0, 200.0, 4.0, 5.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "A B");
        assert_eq!(selection.line_count, 2);
        assert_close(selection.confidence, 0.85);
        assert_eq!(
            selection.bounds,
            vec![[0.0, 0.0], [12.0, 0.0], [12.0, 22.0], [0.0, 22.0]]
        );
        assert_close(selection.area, 264.0);
    }

    #[test]
    fn low_confidence_input_is_kept() {
        let records = vec![
            line("faint", 0.3, 0.0, 0.0, 40.0, 10.0),
            line("fainter", 0.2, 0.0, 100.0, 40.0, 10.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "faint");
    }

    #[test]
    fn low_confidence_records_are_filtered() {
        // The faint record would dominate by height if it survived the filter.
        let records = vec![
            line("noise", 0.1, 0.0, 0.0, 40.0, 100.0),
            line("title", 0.9, 0.0, 200.0, 40.0, 12.0),
            line("subtitle", 0.9, 0.0, 300.0, 40.0, 11.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "title");
    }

    #[test]
    fn best_cluster_wins() {
        let records = vec![
            line("caption", 0.9, 0.0, 0.0, 40.0, 14.0),
            line("headline", 0.9, 0.0, 100.0, 120.0, 14.0),
            line("second line", 0.9, 0.0, 115.0, 110.0, 14.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "headline second line");
    }

    #[test]
    fn equal_scores_keep_first_cluster() {
        let records = vec![
            line("left", 0.9, 0.0, 0.0, 40.0, 10.0),
            line("right", 0.9, 500.0, 0.0, 40.0, 10.0),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.text, "left");
    }

    #[test]
    fn degenerate_geometry_is_tolerated() {
        let records = vec![
            DetectionRecord::new("dot", 0.9, vec![[1.0, 1.0]]),
            DetectionRecord::new("none", 0.9, vec![]),
        ];
        let selection = select_predominant(&records, &SelectionOptions::default()).unwrap();
        assert_eq!(selection.area, 0.0);
    }
}
