// src/site/generic.rs

use crate::job::{errorcodes, Job};

use super::{Rejection, SitePolicy};

/// Default policy: minimal sanity checks, no containers, no log extracts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericPolicy;

impl SitePolicy for GenericPolicy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn validate_job(&self, job: &Job) -> Result<(), Rejection> {
        if job.transformation.trim().is_empty() {
            return Err(Rejection::new(
                errorcodes::JOBDEFINITION,
                "job definition has no transformation",
            ));
        }
        if job.corecount == 0 {
            return Err(Rejection::new(errorcodes::JOBDEFINITION, "core count is zero"));
        }
        Ok(())
    }
}
