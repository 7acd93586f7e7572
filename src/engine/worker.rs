//! The dispatch walk.
//!
//! Documents are visited in tree walk order (pre-order, host order), then the
//! host itself. For each document every plugin accepting it is asked with
//! every translated argument, in plugin order: main plugins first, then
//! additional ones. Results are reverse-mapped and accumulated according to
//! the request kind's [`Policy`].

use std::sync::Arc;

use super::context::RequestContext;
use super::feature::{Feature, Policy, TeleportMode};
use super::teleport;
use super::transform::ResultMapper;
use crate::document::{DocumentMap, DocumentSnapshot};
use crate::error::PluginError;
use crate::plugin::{Handler, Plugin, PluginDocument};

const LOG_TARGET: &str = "yosegi::dispatch";

/// Run one handler invocation as its own task.
///
/// The task is aborted when the request is cancelled. Failures and panics are
/// logged and contribute nothing.
pub(crate) async fn run_handler<F: Feature>(
    ctx: &RequestContext,
    plugin: &Plugin,
    handler: &Handler<F::Arg, F::Output>,
    document: PluginDocument,
    arg: F::Arg,
) -> Option<F::Output> {
    if ctx.is_cancelled() {
        return None;
    }
    let uri = document.uri().clone();
    let mut task = tokio::spawn(handler(document, arg, ctx.clone()));

    let joined = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => None,
        joined = &mut task => Some(joined),
    };
    let Some(joined) = joined else {
        task.abort();
        log::debug!(
            target: LOG_TARGET,
            "{} cancelled while waiting for plugin {}",
            F::NAME,
            plugin.id()
        );
        return None;
    };

    match joined {
        Ok(Ok(output)) => output,
        Ok(Err(PluginError::Cancelled)) => None,
        Ok(Err(e)) => {
            log::warn!(
                target: LOG_TARGET,
                "plugin {} failed {} on {}: {}",
                plugin.id(),
                F::NAME,
                uri,
                e
            );
            None
        }
        Err(e) => {
            log::warn!(
                target: LOG_TARGET,
                "plugin {} panicked in {} on {}: {}",
                plugin.id(),
                F::NAME,
                uri,
                e
            );
            None
        }
    }
}

fn accumulate<F: Feature>(acc: &mut Option<F::Output>, next: F::Output) {
    *acc = Some(match acc.take() {
        Some(previous) => F::combine(previous, next),
        None => next,
    });
}

/// Ask every accepting plugin about one document. Returns whether the
/// document became locked.
async fn visit_document<F: Feature>(
    ctx: &RequestContext,
    map: &DocumentMap,
    args: &[F::Arg],
    trigger: Option<&str>,
    acc: &mut Option<F::Output>,
) -> bool {
    let Some(document) = PluginDocument::from_map(map) else {
        return false;
    };
    let mut locked = false;

    for plugin in ctx.plugins() {
        if locked && !plugin.is_additional() {
            continue;
        }
        if !plugin.accepts_language(map.language_id()) || !plugin.accepts_trigger(trigger) {
            continue;
        }
        let Some(handler) = F::handler(plugin) else {
            continue;
        };

        for arg in args {
            if ctx.is_cancelled() {
                return locked;
            }
            let Some(output) =
                run_handler::<F>(ctx, plugin, handler, document.clone(), arg.clone()).await
            else {
                continue;
            };
            let output = if F::TELEPORT == TeleportMode::Off {
                output
            } else {
                teleport::resolve::<F>(ctx, map, plugin, handler, &document, arg, output).await
            };

            let mapper = ResultMapper::new(map, F::FILTER, plugin);
            let Some(mapped) = F::transform_result(output, &mapper, ctx) else {
                continue;
            };
            if F::is_empty(&mapped) {
                continue;
            }
            log::trace!(
                target: LOG_TARGET,
                "{}: plugin {} contributed for {}",
                F::NAME,
                plugin.id(),
                map.uri()
            );
            accumulate::<F>(acc, mapped);

            match F::POLICY {
                Policy::Combine => {
                    if let Some(acc) = acc.as_ref() {
                        ctx.report(acc);
                    }
                }
                Policy::FirstMatch if !plugin.is_additional() => {
                    locked = true;
                    break;
                }
                Policy::FirstMatch => {}
            }
        }
    }
    locked
}

/// Dispatch one request for a host snapshot.
///
/// Returns the host-coordinate accumulation, `None` when nothing contributed.
pub(crate) async fn dispatch<F: Feature>(
    ctx: &RequestContext,
    snapshot: &Arc<DocumentSnapshot>,
    arg: &F::Arg,
) -> Option<F::Output> {
    let trigger = F::trigger(arg);
    let mut acc: Option<F::Output> = None;
    let mut locked = false;

    if let Some(tree) = snapshot.tree() {
        for node in tree.walk() {
            if ctx.is_cancelled() {
                return acc;
            }
            let map = DocumentMap::node(Arc::clone(snapshot), node);
            let args = F::transform_arg(arg, &map);
            if args.is_empty() {
                continue;
            }
            if visit_document::<F>(ctx, &map, &args, trigger, &mut acc).await {
                locked = true;
                break;
            }
        }
    }

    if !locked && (acc.is_none() || F::POLICY == Policy::Combine) && !ctx.is_cancelled() {
        let map = DocumentMap::host(Arc::clone(snapshot));
        let args = F::transform_arg(arg, &map);
        if !args.is_empty() {
            visit_document::<F>(ctx, &map, &args, trigger, &mut acc).await;
        }
    }

    log::debug!(
        target: LOG_TARGET,
        "{} on {}: {}",
        F::NAME,
        snapshot.uri(),
        if acc.is_some() { "result" } else { "no result" }
    );
    acc
}
