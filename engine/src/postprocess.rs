//! Pass over a finished job's saved slides.
//!
//! Phase one drops slides whose hash is within `phash_threshold` bits of an
//! earlier kept slide. Phase two drops slides within the same bound of a
//! named exclusion entry. Slides whose hash cannot be computed are kept.

use slidewatch_common::config::PostProcessConfig;
use tracing::{debug, error, info, warn};

use crate::filter::phash::{compute_slide_hash, SlideHash};
use crate::ports::{SlideAck, SlideSink};

#[derive(Debug, Clone)]
struct Exclusion {
    name: String,
    hash: SlideHash,
}

/// Why a slide was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Near-identical to the slide at position `of`.
    Duplicate { of: usize, distance: u32 },
    Excluded { name: String, distance: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostProcessSummary {
    pub kept: Vec<SlideAck>,
    pub duplicates_removed: u32,
    pub excluded_removed: u32,
    /// Slides kept because they could not be loaded or hashed.
    pub unhashed: u32,
}

#[derive(Debug, Clone)]
pub struct PostProcessor {
    threshold: u32,
    remove_duplicates: bool,
    exclusions: Vec<Exclusion>,
}

impl PostProcessor {
    /// `None` when post-processing is off or has nothing to do.
    pub fn from_config(config: &PostProcessConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let exclusions: Vec<Exclusion> = if config.enable_exclusion_list {
            config
                .exclusion_list
                .iter()
                .filter_map(|entry| match entry.phash.parse() {
                    Ok(hash) => Some(Exclusion {
                        name: entry.name.clone(),
                        hash,
                    }),
                    Err(e) => {
                        warn!(name = entry.name, error = %e, "ignoring exclusion entry");
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        if !config.enable_duplicate_removal && exclusions.is_empty() {
            return None;
        }
        Some(Self {
            threshold: config.phash_threshold,
            remove_duplicates: config.enable_duplicate_removal,
            exclusions,
        })
    }

    /// Decide which slides go. `hashes[i]` is `None` for a slide that could
    /// not be hashed; such slides are never removed and never matched.
    pub fn plan(&self, hashes: &[Option<SlideHash>]) -> Vec<(usize, Removal)> {
        let mut removals = Vec::new();
        let mut seen: Vec<(usize, SlideHash)> = Vec::new();

        for (i, hash) in hashes.iter().enumerate() {
            let Some(hash) = hash else { continue };

            if self.remove_duplicates {
                let earlier = seen.iter().find_map(|(j, other)| {
                    let distance = hash.distance(other);
                    (distance <= self.threshold).then_some((*j, distance))
                });
                if let Some((of, distance)) = earlier {
                    debug!(slide = i, of, distance, "duplicate slide");
                    removals.push((i, Removal::Duplicate { of, distance }));
                    continue;
                }
                seen.push((i, *hash));
            }

            let excluded = self.exclusions.iter().find_map(|ex| {
                let distance = hash.distance(&ex.hash);
                (distance <= self.threshold).then_some((ex, distance))
            });
            if let Some((ex, distance)) = excluded {
                debug!(slide = i, name = ex.name, distance, "slide matches exclusion");
                removals.push((
                    i,
                    Removal::Excluded {
                        name: ex.name.clone(),
                        distance,
                    },
                ));
            }
        }
        removals
    }

    /// Hash every slide in `slides`, then remove the ones [`Self::plan`] picks.
    /// A slide whose removal fails is kept.
    pub async fn run<S: SlideSink + ?Sized>(&self, slides: Vec<SlideAck>, sink: &S) -> PostProcessSummary {
        let mut summary = PostProcessSummary::default();
        let mut hashes = Vec::with_capacity(slides.len());
        for ack in &slides {
            let hash = match sink.load_slide(ack).await {
                Ok(frame) => compute_slide_hash(&frame).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match hash {
                Ok(h) => hashes.push(Some(h)),
                Err(e) => {
                    warn!(path = ack.location.display().to_string(), error = %e, "cannot hash slide, keeping it");
                    summary.unhashed += 1;
                    hashes.push(None);
                }
            }
        }

        let mut removed = vec![false; slides.len()];
        for (i, reason) in self.plan(&hashes) {
            let ack = &slides[i];
            match sink.remove_slide(ack).await {
                Ok(()) => {
                    removed[i] = true;
                    match reason {
                        Removal::Duplicate { .. } => summary.duplicates_removed += 1,
                        Removal::Excluded { .. } => summary.excluded_removed += 1,
                    }
                }
                Err(e) => error!(path = ack.location.display().to_string(), error = %e, "failed to remove slide"),
            }
        }

        summary.kept = slides
            .into_iter()
            .zip(removed)
            .filter_map(|(ack, gone)| (!gone).then_some(ack))
            .collect();
        info!(
            kept = summary.kept.len(),
            duplicates = summary.duplicates_removed,
            excluded = summary.excluded_removed,
            "post-processing finished"
        );
        summary
    }
}
