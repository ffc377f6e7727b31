//! Blocking git2 implementations of the worker requests.

use std::cell::RefCell;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, ErrorClass, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use tracing::{debug, info};

use super::{RemoteSpec, WorkerRequest, WorkerResponse};
use crate::constants::MAIN_REMOTE;
use crate::sync::auth::{AuthCredentials, Author};
use crate::sync::error::{GitErrorCode, SyncError};
use crate::sync::working_copy::local_branch;

pub(super) fn execute(request: &WorkerRequest) -> WorkerResponse {
    let result = match request {
        WorkerRequest::Clone(remote) => clone(remote),
        WorkerRequest::Pull { remote, author } => pull(remote, author),
        WorkerRequest::Push(remote) => push(remote),
    };

    match result {
        Ok(()) => WorkerResponse::Ok(request.action()),
        Err(err) => WorkerResponse::Err {
            code: err.git_code().unwrap_or(GitErrorCode::Other),
            message: match err {
                SyncError::Git { message, .. } => message,
                other => other.to_string(),
            },
        },
    }
}

/// Callbacks answering credential prompts from the configured user.
///
/// Credentials are offered once per operation; a second prompt means the
/// remote rejected them.
fn remote_callbacks(auth: &AuthCredentials) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;

    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > 1 {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "credentials rejected by remote",
            ));
        }

        let username = if auth.username.is_empty() {
            username_from_url.unwrap_or_default()
        } else {
            auth.username.as_str()
        };

        if allowed.is_user_pass_plaintext() {
            match auth.password() {
                Some(password) => Cred::userpass_plaintext(username, password),
                None => Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Http,
                    "password required",
                )),
            }
        } else if allowed.is_username() {
            Cred::username(username)
        } else {
            Cred::default()
        }
    });

    callbacks
}

fn fetch_options(auth: &AuthCredentials) -> FetchOptions<'_> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(auth));
    options
}

fn clone(remote: &RemoteSpec) -> Result<(), SyncError> {
    info!(work_dir = %remote.work_dir.display(), "Cloning remote repository");
    RepoBuilder::new()
        .fetch_options(fetch_options(&remote.auth))
        .clone(&remote.repo_url, &remote.work_dir)?;
    Ok(())
}

fn pull(remote: &RemoteSpec, author: &Author) -> Result<(), SyncError> {
    // Only fast-forwards are applied, but an unusable identity is still a
    // configuration problem worth surfacing before touching the network.
    author.signature()?;

    let repo = Repository::open(&remote.work_dir)?;
    let branch = local_branch(&repo)?;

    let refspec = format!("+refs/heads/{branch}:refs/remotes/{MAIN_REMOTE}/{branch}");
    repo.find_remote(MAIN_REMOTE)?.fetch(
        &[refspec.as_str()],
        Some(&mut fetch_options(&remote.auth)),
        None,
    )?;

    let tracking = match repo.find_reference(&format!("refs/remotes/{MAIN_REMOTE}/{branch}")) {
        Ok(reference) => reference,
        Err(e) if e.code() == ErrorCode::NotFound => {
            debug!(%branch, "Remote branch does not exist yet");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let fetched = repo.reference_to_annotated_commit(&tracking)?;
    let (analysis, _) = repo.merge_analysis(&[&fetched])?;

    if analysis.is_up_to_date() {
        debug!(%branch, "Already up to date");
        return Ok(());
    }

    let refname = format!("refs/heads/{branch}");
    if analysis.is_unborn() {
        repo.reference(&refname, fetched.id(), true, "pull: initial fast-forward")?;
    } else if analysis.is_fast_forward() {
        repo.find_reference(&refname)?
            .set_target(fetched.id(), "pull: fast-forward")?;
    } else {
        return Err(SyncError::git(
            GitErrorCode::NotFastForward,
            format!("cannot fast-forward {branch} to {MAIN_REMOTE}/{branch}"),
        ));
    }

    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
    info!(%branch, commit = %fetched.id(), "Fast-forwarded");
    Ok(())
}

fn push(remote: &RemoteSpec) -> Result<(), SyncError> {
    let repo = Repository::open(&remote.work_dir)?;
    let branch = local_branch(&repo)?;
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

    let rejected: RefCell<Option<String>> = RefCell::new(None);
    {
        let mut callbacks = remote_callbacks(&remote.auth);
        callbacks.push_update_reference(|refname, status| {
            if let Some(message) = status {
                *rejected.borrow_mut() = Some(format!("{refname}: {message}"));
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        repo.find_remote(MAIN_REMOTE)?
            .push(&[refspec.as_str()], Some(&mut options))?;
    }

    // A rejected push is not proof of divergence; the next pull decides that.
    if let Some(message) = rejected.into_inner() {
        return Err(SyncError::git(GitErrorCode::Other, message));
    }

    info!(%branch, "Pushed");
    Ok(())
}
