//! Channel-quality report
//!
//! Human-readable summary regenerated on demand from the channel registry.
//! Read-only; not part of the control loop.

use crate::discovery::ChannelRegistry;

pub fn channel_quality_report(
    registry: &ChannelRegistry,
    min_videos_analyzed: u64,
    min_quality_score: f64,
) -> String {
    let mut channels: Vec<_> = registry.iter().collect();
    channels.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.total_analyzed.cmp(&a.total_analyzed))
    });

    let promising_count = channels
        .iter()
        .filter(|c| c.is_promising(min_videos_analyzed, min_quality_score))
        .count();

    let mut out = String::new();
    out.push_str("Channel quality report\n");
    out.push_str("======================\n");
    out.push_str(&format!(
        "{} channels tracked, {} promising (>= {} analyzed, >= {:.0}% qualified)\n\n",
        channels.len(),
        promising_count,
        min_videos_analyzed,
        min_quality_score * 100.0
    ));

    for info in channels {
        let promising = if info.is_promising(min_videos_analyzed, min_quality_score) {
            "  PROMISING"
        } else {
            ""
        };
        let last_crawled = info
            .last_crawled
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "{:<30} {:>3}/{:<3} qualified ({:>5.1}%)  last crawled: {}{}\n",
            info.username,
            info.qualified_videos,
            info.total_analyzed,
            info.quality_score * 100.0,
            last_crawled,
            promising
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ChannelRegistry;

    #[test]
    fn report_flags_promising_channels() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ChannelRegistry::load(
            dir.path().join("channels.json"),
            dir.path().join("backups"),
        )
        .unwrap();

        for _ in 0..6 {
            registry.record_analysis("good_channel", true).unwrap();
        }
        registry.record_analysis("new_channel", true).unwrap();

        let report = channel_quality_report(&registry, 5, 0.3);
        assert!(report.contains("2 channels tracked, 1 promising"));
        let good_line = report
            .lines()
            .find(|l| l.contains("good_channel"))
            .unwrap();
        assert!(good_line.contains("PROMISING"));
        let new_line = report.lines().find(|l| l.contains("new_channel")).unwrap();
        assert!(!new_line.contains("PROMISING"));
    }
}
