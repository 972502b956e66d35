//! イメージ参照の解析
//!
//! イメージ参照は `[domain/]repo[:tag]`。`domain` 自体が `/` を含むことがある
//! （`registry.cn-hangzhou.aliyuncs.com/namespace`）。

use std::fmt;

/// タグが無いときに使うタグ
pub const DEFAULT_TAG: &str = "latest";

/// `domain/repo:tag` の組
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    /// レジストリのドメイン（名前空間を含むことがある）。無ければ空
    pub domain: String,
    pub repo: String,
    pub tag: String,
}

impl Image {
    pub fn new(domain: impl Into<String>, repo: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    /// イメージ参照を解析する
    ///
    /// # 例
    /// - `registry.cn-hangzhou.aliyuncs.com/foo/app:master-1` -> (`registry.cn-hangzhou.aliyuncs.com/foo`, `app`, `master-1`)
    /// - `nginx` -> (``, `nginx`, `latest`)
    pub fn parse(reference: &str) -> Self {
        let (domain, repo_with_tag) = match reference.rfind('/') {
            Some(pos) => (&reference[..pos], &reference[pos + 1..]),
            None => ("", reference),
        };

        let (repo, tag) = match repo_with_tag.rfind(':') {
            Some(pos) => (&repo_with_tag[..pos], &repo_with_tag[pos + 1..]),
            None => (repo_with_tag, DEFAULT_TAG),
        };

        Self::new(domain, repo, tag)
    }

    /// リポジトリとタグはそのままに、別のレジストリの接頭辞に付け替える
    pub fn with_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..self.clone()
        }
    }

    /// ドメインを除いた `repo:tag`
    pub fn repo_with_tag(&self) -> String {
        format!("{}:{}", self.repo, self.tag)
    }

    /// タグを除いた参照（`domain/repo` または `repo`）
    pub fn name(&self) -> String {
        if self.domain.is_empty() {
            self.repo.clone()
        } else {
            format!("{}/{}", self.domain, self.repo)
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}:{}", self.repo, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.domain, self.repo, self.tag)
        }
    }
}

impl From<&str> for Image {
    fn from(reference: &str) -> Self {
        Self::parse(reference)
    }
}

/// 参照がタグを明示しているか（最後のパス要素に `:` がある）
pub fn has_explicit_tag(reference: &str) -> bool {
    reference
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_references() {
        let cases = [
            (
                "registry.cn-hangzhou.aliyuncs.com/foo/a-service:master-foo",
                "registry.cn-hangzhou.aliyuncs.com/foo",
                "a-service",
                "master-foo",
            ),
            (
                "registry.cn-hangzhou.aliyuncs.com/bar/a-service",
                "registry.cn-hangzhou.aliyuncs.com/bar",
                "a-service",
                "latest",
            ),
            (
                "123.dkr.ecr.cn-north-1.amazonaws.com.cn/nginx:latest",
                "123.dkr.ecr.cn-north-1.amazonaws.com.cn",
                "nginx",
                "latest",
            ),
            (
                "456.dkr.ecr.cn-north-1.amazonaws.com/nginx:alpine",
                "456.dkr.ecr.cn-north-1.amazonaws.com",
                "nginx",
                "alpine",
            ),
            ("nginx:alpine", "", "nginx", "alpine"),
            ("foo/nginx:alpine", "foo", "nginx", "alpine"),
        ];

        for (reference, domain, repo, tag) in cases {
            let image = Image::parse(reference);
            assert_eq!(image.domain, domain, "domain of {}", reference);
            assert_eq!(image.repo, repo, "repo of {}", reference);
            assert_eq!(image.tag, tag, "tag of {}", reference);
        }
    }

    #[test]
    fn test_parse_bare_repo() {
        assert_eq!(Image::parse("r"), Image::new("", "r", "latest"));
    }

    #[test]
    fn test_format_is_stable_for_canonical_references() {
        for reference in [
            "d/r:t",
            "registry.cn-hangzhou.aliyuncs.com/ns1/busybox:latest",
            "1234.dkr.ecr.cn-north-1.amazonaws.com.cn/foo:dev",
            "nginx:alpine",
        ] {
            assert_eq!(Image::parse(reference).to_string(), reference);
        }
    }

    #[test]
    fn test_port_in_domain_is_not_a_tag() {
        let image = Image::parse("localhost:5000/app");
        assert_eq!(image.domain, "localhost:5000");
        assert_eq!(image.repo, "app");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_with_domain() {
        let image = Image::parse("docker.io/library/nginx:1.25");
        let moved = image.with_domain("registry.cn-hangzhou.aliyuncs.com/mirror");
        assert_eq!(
            moved.to_string(),
            "registry.cn-hangzhou.aliyuncs.com/mirror/nginx:1.25"
        );
        assert_eq!(moved.name(), "registry.cn-hangzhou.aliyuncs.com/mirror/nginx");
    }

    #[test]
    fn test_has_explicit_tag() {
        assert!(has_explicit_tag("foo/bar:v1"));
        assert!(!has_explicit_tag("localhost:5000/bar"));
        assert!(!has_explicit_tag("bar"));
    }
}
