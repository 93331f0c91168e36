// src/dispatcher/request.rs

use crate::config::model::ConfigFile;
use crate::workernode::WorkerNode;

use super::Params;

/// Build the `getJob` request.
///
/// `diskSpace` is in MB, `mem` in MB and `cpu` in MHz. `taskid` is set when
/// the request was triggered by a broker message for a given task.
pub fn build_getjob_params(
    config: &ConfigFile,
    node: &WorkerNode,
    disk_space_mb: u64,
    taskid: Option<&str>,
) -> Params {
    let pilot = &config.pilot;
    let mut params: Params = vec![
        ("siteName".into(), pilot.site.clone()),
        ("computingElement".into(), pilot.queue.clone()),
        ("prodSourceLabel".into(), pilot.job_label.clone()),
        ("diskSpace".into(), disk_space_mb.to_string()),
        (
            "workingGroup".into(),
            pilot.working_group.clone().unwrap_or_default(),
        ),
        ("cpu".into(), format!("{:.1}", node.cpu_mhz)),
        ("mem".into(), format!("{:.1}", node.mem_mb)),
        ("node".into(), node.name.clone()),
    ];

    let mut optional = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            params.push((key.to_string(), value));
        }
    };

    optional("jobType", pilot.job_type.clone());
    if pilot.allow_other_country {
        optional("allowOtherCountry", Some("True".to_string()));
    }
    optional("countryGroup", pilot.country_group.clone());
    if pilot.job_label == "self" {
        optional("prodUserID", pilot.user_dn.clone());
    }
    if let Some(taskid) = taskid {
        optional("taskID", Some(taskid.to_string()));
        optional("viaTopic", Some("True".to_string()));
    }
    optional("resourceType", pilot.resource_type.clone());
    if pilot.harvester {
        optional("harvester_id", pilot.harvester_id.clone());
        optional("worker_id", pilot.worker_id.clone());
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;

    fn config(mutate: impl FnOnce(&mut RawConfigFile)) -> ConfigFile {
        let mut raw = RawConfigFile::default();
        raw.pilot.site = "SITE".into();
        raw.pilot.queue = "QUEUE".into();
        mutate(&mut raw);
        ConfigFile::new_unchecked(raw)
    }

    fn value<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn required_keys_are_always_present() {
        let params = build_getjob_params(&config(|_| {}), &WorkerNode::default(), 1234, None);
        for key in [
            "siteName",
            "computingElement",
            "prodSourceLabel",
            "diskSpace",
            "workingGroup",
            "cpu",
            "mem",
            "node",
        ] {
            assert!(value(&params, key).is_some(), "missing {key}");
        }
        assert_eq!(value(&params, "siteName"), Some("SITE"));
        assert_eq!(value(&params, "computingElement"), Some("QUEUE"));
        assert_eq!(value(&params, "diskSpace"), Some("1234"));
        assert_eq!(value(&params, "taskID"), None);
    }

    #[test]
    fn self_label_sends_user_dn() {
        let cfg = config(|raw| {
            raw.pilot.job_label = "self".into();
            raw.pilot.user_dn = Some("/DC=org/CN=someone".into());
        });
        let params = build_getjob_params(&cfg, &WorkerNode::default(), 0, Some("77"));
        assert_eq!(value(&params, "prodUserID"), Some("/DC=org/CN=someone"));
        assert_eq!(value(&params, "taskID"), Some("77"));
        assert_eq!(value(&params, "viaTopic"), Some("True"));
    }
}
