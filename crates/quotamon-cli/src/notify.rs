use std::collections::{BTreeMap, HashMap};

use quotamon_core::InodeCritical;

const CRITICAL_INODE_MESSAGE: &str = "\
Dear admins,

The following filesets will be running out of inodes soon (or may already have run out).

{fileset_info}

Kind regards,
Your friendly inode-watching service
";

/// Builds the admin message body for filesets running out of inodes.
pub fn format_critical_inodes(
    critical: &BTreeMap<String, HashMap<String, InodeCritical>>,
) -> String {
    let mut lines = Vec::new();
    for (filesystem, filesets) in critical {
        let mut names: Vec<&String> = filesets.keys().collect();
        names.sort();
        for name in names {
            let info = &filesets[name];
            lines.push(format!(
                "{} - {}: used {} ({}%) of max {} [allocated: {}]",
                filesystem,
                name,
                info.used,
                info.used * 100 / info.maxinodes,
                info.maxinodes,
                info.allocated
            ));
        }
    }
    CRITICAL_INODE_MESSAGE.replace("{fileset_info}", &lines.join("\n"))
}

/// Outbound notification boundary. The mail transport itself lives with an
/// external collaborator; implementations here only hand the message over.
pub trait Notifier {
    fn send(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Notifier that logs the message instead of sending it.
#[derive(Debug, Default)]
pub struct LogNotifier {
    pub dry_run: bool,
}

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.dry_run {
            tracing::info!("Would have sent message {:?}: {}", subject, body);
        } else {
            tracing::info!("Notification {:?}: {}", subject, body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_critical_inodes_lines() {
        let critical = BTreeMap::from([(
            "scratchphanpy".to_string(),
            HashMap::from([(
                "gvo00002".to_string(),
                InodeCritical {
                    used: 901,
                    allocated: 950,
                    maxinodes: 1000,
                },
            )]),
        )]);

        let message = format_critical_inodes(&critical);
        assert!(message.contains("scratchphanpy - gvo00002: used 901 (90%) of max 1000 [allocated: 950]"));
        assert!(message.contains("running out of inodes"));
    }

    #[test]
    fn test_format_sorts_filesets_within_filesystem() {
        let critical = BTreeMap::from([(
            "scratch".to_string(),
            HashMap::from([
                (
                    "beta".to_string(),
                    InodeCritical {
                        used: 95,
                        allocated: 0,
                        maxinodes: 100,
                    },
                ),
                (
                    "alpha".to_string(),
                    InodeCritical {
                        used: 99,
                        allocated: 0,
                        maxinodes: 100,
                    },
                ),
            ]),
        )]);

        let message = format_critical_inodes(&critical);
        let alpha = message.find("alpha").unwrap();
        let beta = message.find("beta").unwrap();
        assert!(alpha < beta);
    }

    #[test]
    fn test_log_notifier_send_ok() {
        let notifier = LogNotifier { dry_run: true };
        assert!(notifier.send("subject", "body").is_ok());
    }
}
