//! 新規作成した ECR リポジトリに設定するライフサイクルポリシー

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub rules: Vec<LifecycleRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    pub rule_priority: u32,
    pub description: String,
    pub selection: Selection,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub tag_status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_prefix_list: Vec<String>,
    pub count_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_unit: Option<String>,
    pub count_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Action {
    fn expire() -> Self {
        Self {
            kind: "expire".to_string(),
        }
    }
}

/// `master-`/`release-` は新しい100件を残し、タグ無しは7日で削除、全体は最大200件
pub fn default_lifecycle_policy() -> LifecyclePolicy {
    LifecyclePolicy {
        rules: vec![
            LifecycleRule {
                rule_priority: 1,
                description: "Keep 100 primary images".to_string(),
                selection: Selection {
                    tag_status: "tagged".to_string(),
                    tag_prefix_list: vec!["master-".to_string(), "release-".to_string()],
                    count_type: "imageCountMoreThan".to_string(),
                    count_unit: None,
                    count_number: 100,
                },
                action: Action::expire(),
            },
            LifecycleRule {
                rule_priority: 2,
                description: "Remove untagged images older than a week".to_string(),
                selection: Selection {
                    tag_status: "untagged".to_string(),
                    tag_prefix_list: Vec::new(),
                    count_type: "sinceImagePushed".to_string(),
                    count_unit: Some("days".to_string()),
                    count_number: 7,
                },
                action: Action::expire(),
            },
            LifecycleRule {
                rule_priority: 10,
                description: "No more than 200 images".to_string(),
                selection: Selection {
                    tag_status: "any".to_string(),
                    tag_prefix_list: Vec::new(),
                    count_type: "imageCountMoreThan".to_string(),
                    count_unit: None,
                    count_number: 200,
                },
                action: Action::expire(),
            },
        ],
    }
}

impl LifecyclePolicy {
    pub fn to_json(&self) -> String {
        // 単純なデータなのでシリアライズは失敗しない
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_contents() {
        let value: serde_json::Value =
            serde_json::from_str(&default_lifecycle_policy().to_json()).unwrap();
        let rules = value["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 3);

        assert_eq!(rules[0]["rulePriority"], 1);
        assert_eq!(rules[0]["selection"]["countType"], "imageCountMoreThan");
        assert_eq!(rules[0]["selection"]["countNumber"], 100);
        assert_eq!(rules[0]["selection"]["tagStatus"], "tagged");
        assert_eq!(
            rules[0]["selection"]["tagPrefixList"],
            serde_json::json!(["master-", "release-"])
        );

        assert_eq!(rules[1]["selection"]["countType"], "sinceImagePushed");
        assert_eq!(rules[1]["selection"]["countUnit"], "days");
        assert_eq!(rules[1]["selection"]["countNumber"], 7);
        assert_eq!(rules[1]["selection"]["tagStatus"], "untagged");
        assert!(rules[1]["selection"].get("tagPrefixList").is_none());

        assert_eq!(rules[2]["rulePriority"], 10);
        assert_eq!(rules[2]["selection"]["countNumber"], 200);
        assert_eq!(rules[2]["selection"]["tagStatus"], "any");

        for rule in rules {
            assert_eq!(rule["action"]["type"], "expire");
        }
    }

    #[test]
    fn test_policy_parses_back() {
        let policy = default_lifecycle_policy();
        let parsed: LifecyclePolicy = serde_json::from_str(&policy.to_json()).unwrap();
        assert_eq!(parsed, policy);
    }
}
