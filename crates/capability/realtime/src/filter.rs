use crate::RelayError;

/// topic 过滤器。
///
/// 按 `/` 分段逐段比较：`+` 匹配任意单段，`#` 匹配剩余全部段（只能位于末尾）。
/// 过滤器段数少于 topic 时按前缀匹配，空过滤器匹配所有 topic。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicFilter {
    segments: Vec<String>,
}

impl TopicFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::all());
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(RelayError::InvalidFilter(format!("empty segment in {}", raw)));
            }
            if segment == "#" && index + 1 != segments.len() {
                return Err(RelayError::InvalidFilter(format!(
                    "'#' must be the last segment in {}",
                    raw
                )));
            }
            if segment.len() > 1 && (segment.contains('#') || segment.contains('+')) {
                return Err(RelayError::InvalidFilter(format!(
                    "wildcard must occupy a whole segment in {}",
                    raw
                )));
            }
        }
        Ok(Self { segments })
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.trim_matches('/').split('/');
        for segment in &self.segments {
            if segment == "#" {
                return true;
            }
            let Some(part) = parts.next() else {
                return false;
            };
            if segment != "+" && segment != part {
                return false;
            }
        }
        true
    }

    pub fn is_all(&self) -> bool {
        self.segments.is_empty()
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("#");
        }
        f.write_str(&self.segments.join("/"))
    }
}
