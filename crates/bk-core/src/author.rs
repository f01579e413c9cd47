use serde::{Deserialize, Serialize};

/// Identity used when the bot is the one committing.
pub const DEFAULT_GIT_AUTHOR: &str = "Branchkeeper Bot <bot@branchkeeper.invalid>";

/// A parsed `Name <email>` author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthor {
    pub name: Option<String>,
    pub email: String,
}

impl GitAuthor {
    /// Parse `Name <email>`, `<email>` or a bare `email`.
    ///
    /// Returns `None` when no plausible address can be found.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (name, email) = match (input.rfind('<'), input.ends_with('>')) {
            (Some(open), true) => {
                let name = input[..open].trim().trim_matches('"').trim();
                let email = input[open + 1..input.len() - 1].trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, email)
            }
            (None, false) => (None, input),
            _ => return None,
        };

        if !is_plausible_email(email) {
            return None;
        }
        Some(Self {
            name,
            email: email.to_string(),
        })
    }
}

impl std::fmt::Display for GitAuthor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !email.chars().any(|c| c.is_whitespace() || c == '<' || c == '>')
}

/// Commit identity handed to a session before its first commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub author: GitAuthor,
    /// GPG key id; commits are signed when set.
    pub signing_key: Option<String>,
}

/// Supplies the commit identity. Called at most once per session.
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> CommitIdentity;
}

/// Identity fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub CommitIdentity);

impl StaticIdentity {
    /// The bot's default identity without signing.
    pub fn bot() -> Self {
        let author = GitAuthor::parse(DEFAULT_GIT_AUTHOR).unwrap_or(GitAuthor {
            name: None,
            email: "bot@branchkeeper.invalid".into(),
        });
        Self(CommitIdentity {
            author,
            signing_key: None,
        })
    }
}

impl StaticIdentity {
    /// Identity described by `git_author` / `signing_key`, or the bot
    /// default when no author is configured.
    pub fn from_config(config: &crate::config::GitConfig) -> Self {
        let mut identity = Self::bot();
        if let Some(author) = config.git_author.as_deref().and_then(GitAuthor::parse) {
            identity.0.author = author;
        }
        identity.0.signing_key = config.signing_key.clone();
        identity
    }
}

impl IdentityProvider for StaticIdentity {
    fn identity(&self) -> CommitIdentity {
        self.0.clone()
    }
}
