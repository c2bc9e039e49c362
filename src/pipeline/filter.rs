//! Predicate gate in front of a destination.

use super::{status_channel, StatusReceiver, StatusSender};
use crate::services::AccountLookup;
use anyhow::{Context, Result};
use feedroom_core::{AccountId, Status, Visibility};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Conditions a status must meet to pass a filter stage.
///
/// Checks run in the order of [`Check`] and stop at the first failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Used in log lines only.
    pub name: String,
    pub must_be_unmuted: bool,
    pub must_not_be_sensitive: bool,
    pub must_be_original: bool,
    pub must_be_written_by_us: bool,
    pub must_not_be_written_by_us: bool,
    pub check_visibility: bool,
    pub allowed_visibility: Vec<Visibility>,
    pub must_be_followed_by_us: bool,
    pub check_tagnames: bool,
    pub tag_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Flags,
    WrittenByUs,
    NotWrittenByUs,
    Visibility,
    FollowedByUs,
    TagNames,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flags => "flag check",
            Self::WrittenByUs => "must be written by us",
            Self::NotWrittenByUs => "must not be written by us",
            Self::Visibility => "visibility check",
            Self::FollowedByUs => "follow check",
            Self::TagNames => "tag check",
        })
    }
}

impl FilterConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn fails_flags(&self, status: &Status) -> bool {
        (self.must_be_unmuted && status.is_muted())
            || (self.must_not_be_sensitive && status.sensitive)
            || (self.must_be_original && status.is_reblog())
    }

    /// The first check `status` fails, or `None` if it passes all of them.
    pub async fn first_failure(
        &self,
        status: &Status,
        us: &AccountId,
        accounts: &dyn AccountLookup,
    ) -> Option<Check> {
        if self.fails_flags(status) {
            return Some(Check::Flags);
        }

        let by_us = status.account.id == *us;
        if self.must_be_written_by_us && !by_us {
            return Some(Check::WrittenByUs);
        }
        if self.must_not_be_written_by_us && by_us {
            return Some(Check::NotWrittenByUs);
        }

        if self.check_visibility
            && !self.allowed_visibility.is_empty()
            && !self.allowed_visibility.contains(&status.visibility)
        {
            return Some(Check::Visibility);
        }

        if self.must_be_followed_by_us {
            let followed = match accounts.relationship(&status.account.id).await {
                Ok(rel) => rel.following && !rel.blocking,
                Err(e) => {
                    warn!(
                        "filter {}: relationship lookup for {} failed: {e:#}",
                        self.name, status.account.id
                    );
                    false
                }
            };
            if !followed {
                return Some(Check::FollowedByUs);
            }
        }

        if self.check_tagnames
            && !self.tag_names.is_empty()
            && !self.tag_names.iter().any(|name| status.has_tag(name))
        {
            return Some(Check::TagNames);
        }

        None
    }
}

/// Start a filter stage and return its input.
///
/// The local account is resolved before the worker starts; failing to
/// resolve it is an error for the caller. Every incoming status is offered
/// to `mirror` without waiting, then checked; passing statuses are sent to
/// `pass`.
pub async fn attach(
    config: FilterConfig,
    accounts: Arc<dyn AccountLookup>,
    pass: StatusSender,
    mirror: Option<StatusSender>,
) -> Result<StatusSender> {
    let us = accounts
        .current_account()
        .await
        .with_context(|| format!("filter {}: failed to resolve local account", config.name))?
        .id;

    let (input, rx) = status_channel();
    tokio::spawn(run(config, us, accounts, rx, pass, mirror));
    Ok(input)
}

async fn run(
    config: FilterConfig,
    us: AccountId,
    accounts: Arc<dyn AccountLookup>,
    mut input: StatusReceiver,
    pass: StatusSender,
    mut mirror: Option<StatusSender>,
) {
    info!("filter {}: started", config.name);
    while let Some(status) = input.recv().await {
        if let Some(tx) = &mirror {
            match tx.try_send(Arc::clone(&status)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("filter {}: mirror full, dropping {}", config.name, status.id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("filter {}: mirror closed, detaching", config.name);
                    mirror = None;
                }
            }
        }

        if let Some(check) = config.first_failure(&status, &us, accounts.as_ref()).await {
            debug!("filter {}: {} failed {check}", config.name, status.id);
            continue;
        }

        if pass.send(status).await.is_err() {
            warn!("filter {}: output closed, stopping", config.name);
            break;
        }
    }
    info!("filter {}: input closed", config.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reblog_of, status, tagged, MockAccounts};
    use std::time::Duration;
    use tokio::time::timeout;

    fn us() -> AccountId {
        AccountId::from("me")
    }

    async fn check(config: &FilterConfig, status: &Status) -> Option<Check> {
        let accounts = MockAccounts::new("me").following(["friend"]);
        config.first_failure(status, &us(), &accounts).await
    }

    #[tokio::test]
    async fn must_be_original_drops_reblogs_first() {
        let config = FilterConfig {
            must_be_original: true,
            must_be_written_by_us: true,
            ..FilterConfig::named("t")
        };
        let boost = reblog_of(status("2", "stranger"), "me");
        assert_eq!(check(&config, &boost).await, Some(Check::Flags));

        let permissive = FilterConfig::named("t");
        assert_eq!(check(&permissive, &boost).await, None);
    }

    #[tokio::test]
    async fn must_be_original_drops_statuses_we_boosted() {
        let config = FilterConfig {
            must_be_original: true,
            ..FilterConfig::named("t")
        };
        let mut boosted = status("77", "me");
        boosted.reblogged = Some(true);
        assert!(boosted.reblog.is_none());
        assert_eq!(check(&config, &boosted).await, Some(Check::Flags));

        boosted.reblogged = Some(false);
        assert_eq!(check(&config, &boosted).await, None);
    }

    #[tokio::test]
    async fn authorship_checks() {
        let ours = status("1", "me");
        let written = FilterConfig {
            must_be_written_by_us: true,
            ..FilterConfig::named("t")
        };
        let not_written = FilterConfig {
            must_not_be_written_by_us: true,
            ..FilterConfig::named("t")
        };
        assert_eq!(check(&written, &ours).await, None);
        assert_eq!(check(&not_written, &ours).await, Some(Check::NotWrittenByUs));
        assert_eq!(
            check(&written, &status("2", "friend")).await,
            Some(Check::WrittenByUs)
        );
    }

    #[tokio::test]
    async fn flag_checks() {
        let mut muted = status("1", "me");
        muted.muted = Some(true);
        let mut sensitive = status("2", "me");
        sensitive.sensitive = true;

        let config = FilterConfig {
            must_be_unmuted: true,
            must_not_be_sensitive: true,
            ..FilterConfig::named("t")
        };
        assert_eq!(check(&config, &muted).await, Some(Check::Flags));
        assert_eq!(check(&config, &sensitive).await, Some(Check::Flags));

        let mut unknown = status("3", "me");
        unknown.muted = None;
        assert_eq!(check(&config, &unknown).await, None);
    }

    #[tokio::test]
    async fn visibility_and_tags() {
        let config = FilterConfig {
            check_visibility: true,
            allowed_visibility: vec![Visibility::Public, Visibility::Unlisted],
            check_tagnames: true,
            tag_names: vec!["release".into(), "news".into()],
            ..FilterConfig::named("t")
        };

        assert_eq!(check(&config, &tagged("1", "me", &["news"])).await, None);
        assert_eq!(
            check(&config, &tagged("2", "me", &["Release"])).await,
            Some(Check::TagNames)
        );

        let mut private = tagged("3", "me", &["release"]);
        private.visibility = Visibility::Private;
        assert_eq!(check(&config, &private).await, Some(Check::Visibility));

        let unchecked = FilterConfig {
            check_visibility: false,
            ..config.clone()
        };
        assert_eq!(check(&unchecked, &private).await, None);
    }

    #[tokio::test]
    async fn follow_check_fails_closed() {
        let config = FilterConfig {
            must_be_followed_by_us: true,
            ..FilterConfig::named("t")
        };
        assert_eq!(check(&config, &status("1", "friend")).await, None);
        assert_eq!(
            check(&config, &status("2", "stranger")).await,
            Some(Check::FollowedByUs)
        );

        let failing = MockAccounts::new("me").failing_relationships();
        assert_eq!(
            config
                .first_failure(&status("3", "friend"), &us(), &failing)
                .await,
            Some(Check::FollowedByUs)
        );
    }

    #[tokio::test]
    async fn stage_mirrors_everything_and_passes_matches() {
        let (pass_tx, mut pass_rx) = status_channel();
        let (mirror_tx, mut mirror_rx) = status_channel();
        let config = FilterConfig {
            must_be_written_by_us: true,
            ..FilterConfig::named("ours")
        };

        let input = attach(config, Arc::new(MockAccounts::new("me")), pass_tx, Some(mirror_tx))
            .await
            .unwrap();

        input.send(Arc::new(status("1", "me"))).await.unwrap();
        input.send(Arc::new(status("2", "other"))).await.unwrap();
        drop(input);

        assert_eq!(pass_rx.recv().await.unwrap().id.as_str(), "1");
        assert!(pass_rx.recv().await.is_none());

        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "1");
        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "2");
        assert!(mirror_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_mirror_does_not_block_pass() {
        let (pass_tx, mut pass_rx) = status_channel();
        let (mirror_tx, _mirror_rx) = tokio::sync::mpsc::channel(1);

        let input = attach(
            FilterConfig::named("t"),
            Arc::new(MockAccounts::new("me")),
            pass_tx,
            Some(mirror_tx),
        )
        .await
        .unwrap();

        for i in 0..5 {
            input.send(Arc::new(status(&i.to_string(), "me"))).await.unwrap();
        }
        for _ in 0..5 {
            timeout(Duration::from_secs(1), pass_rx.recv())
                .await
                .expect("pass must not stall on a full mirror")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn unresolvable_account_aborts_attach() {
        let (pass_tx, _pass_rx) = status_channel();
        let accounts = Arc::new(MockAccounts::new("me").failing_account());
        let err = attach(FilterConfig::named("broken"), accounts, pass_tx, None)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("filter broken"));
    }
}
