//! Content multiplexing.
//!
//! Before any client is admitted, one probe per media pool fetches a
//! server's item definitions, node definitions and media. [`merge`] folds
//! those catalogues into a single [`GlobalContent`]: names are namespaced by
//! pool and every node type gets a process-wide content id. The result is
//! frozen and shared by `Arc`; sessions only read it.
//!
//! Content ids come from one counter that starts at 0 and skips the three
//! sentinels (`unknown`, `air`, `ignore`), which mean the same thing on every
//! server and map to themselves.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use voxmux_net::messages::{
    Alias, CONTENT_IGNORE, CONTENT_UNKNOWN, Content, ItemDef, NodeDef, is_sentinel_content,
};

use crate::directory::{ServerDescriptor, ServerDirectory};
use crate::namespace;
use crate::probe::ProbeError;

/// A media file as announced by a server.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub name: String,
    pub checksum: String,
    /// `None` until fetched.
    pub data: Option<Arc<[u8]>>,
}

/// Everything one probe collected from one server, with original names.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    pub server: String,
    pub pool: String,
    pub item_defs: Vec<ItemDef>,
    pub aliases: Vec<Alias>,
    pub node_defs: Vec<NodeDef>,
    pub media: Vec<MediaFile>,
    pub remotes: Vec<String>,
}

/// Why content could not be multiplexed.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MuxError {
    #[error("no server of media pool {0:?} is reachable")]
    PoolExhausted(String),
    #[error("probe task for media pool {0:?} failed")]
    TaskFailed(String),
    #[error("no servers configured")]
    NoPools,
    #[error("ran out of content ids")]
    IdsExhausted,
}

/// Records a node's original name against its global id. Persisting these
/// aliases lives outside the proxy.
pub trait NodeIdRegistry: Send + Sync {
    fn register(&self, name: &str, global: Content);
}

/// Registry that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNodeIds;

impl NodeIdRegistry for NoNodeIds {
    fn register(&self, _name: &str, _global: Content) {}
}

/// Fetches one server's catalogue.
pub trait Prober: Send + Sync {
    fn probe(
        &self,
        server: &ServerDescriptor,
    ) -> impl Future<Output = Result<Catalogue, ProbeError>> + Send;
}

/// The merged, read-only content of all pools.
#[derive(Debug, Default)]
pub struct GlobalContent {
    pub item_defs: Vec<ItemDef>,
    pub aliases: Vec<Alias>,
    pub node_defs: Vec<NodeDef>,
    pub media: Vec<MediaFile>,
    pub remotes: Vec<String>,
    media_index: HashMap<String, usize>,
    pool_to_global: HashMap<String, HashMap<Content, Content>>,
    global_to_pool: HashMap<Content, (String, Content)>,
}

impl GlobalContent {
    /// Translate a server's content id. Ids the pool never defined become
    /// `unknown`.
    pub fn to_global(&self, pool: &str, id: Content) -> Content {
        if is_sentinel_content(id) {
            return id;
        }
        self.pool_to_global
            .get(pool)
            .and_then(|map| map.get(&id))
            .copied()
            .unwrap_or(CONTENT_UNKNOWN)
    }

    /// Owning pool and server-side id of a global id. Sentinels belong to no
    /// pool (empty string).
    pub fn to_server(&self, global: Content) -> Option<(&str, Content)> {
        self.global_to_pool
            .get(&global)
            .map(|(pool, id)| (pool.as_str(), *id))
    }

    /// Server-side id of `global` for a server in `pool`, if that pool owns it.
    pub fn to_pool(&self, pool: &str, global: Content) -> Option<Content> {
        match self.to_server(global)? {
            (_, id) if is_sentinel_content(global) => Some(id),
            (owner, id) if owner == pool => Some(id),
            _ => None,
        }
    }

    /// A media file by its namespaced name.
    pub fn media(&self, name: &str) -> Option<&MediaFile> {
        self.media_index.get(name).map(|&i| &self.media[i])
    }

    /// Whether `pool` was multiplexed.
    pub fn has_pool(&self, pool: &str) -> bool {
        self.pool_to_global.contains_key(pool)
    }

    /// Names of all multiplexed pools, in no particular order.
    pub fn pools(&self) -> impl Iterator<Item = &str> {
        self.pool_to_global.keys().map(String::as_str)
    }
}

/// Probe every pool concurrently and merge the results.
///
/// Each pool tries its servers in order and keeps the first complete
/// catalogue. Fails if any pool has no reachable server.
pub async fn multiplex<P>(
    directory: &ServerDirectory,
    prober: Arc<P>,
    registry: &dyn NodeIdRegistry,
) -> Result<GlobalContent, MuxError>
where
    P: Prober + 'static,
{
    let pools = directory.pools().await;
    if pools.is_empty() {
        return Err(MuxError::NoPools);
    }

    let handles: Vec<_> = pools
        .into_iter()
        .map(|(pool, members)| {
            let prober = Arc::clone(&prober);
            let task = tokio::spawn(async move {
                for server in &members {
                    match prober.probe(server).await {
                        Ok(catalogue) => {
                            tracing::info!(dir = "<->", content = %server.name, pool = %server.media_pool, "content fetched");
                            return Some(catalogue);
                        }
                        Err(e) => {
                            tracing::warn!(dir = "<->", content = %server.name, "probe failed: {e}");
                        }
                    }
                }
                None
            });
            (pool, task)
        })
        .collect();

    // Every pool resolves before anything is decided, so no probe outlives
    // this call.
    let mut catalogues = Vec::with_capacity(handles.len());
    let mut failure = None;
    for (pool, handle) in handles {
        let error = match handle.await {
            Ok(Some(catalogue)) => {
                catalogues.push(catalogue);
                continue;
            }
            Ok(None) => MuxError::PoolExhausted(pool),
            Err(_) => MuxError::TaskFailed(pool),
        };
        failure.get_or_insert(error);
    }

    match failure {
        Some(error) => Err(error),
        None => merge(catalogues, registry),
    }
}

/// Fold catalogues, in order, into the global namespace.
pub fn merge(
    catalogues: Vec<Catalogue>,
    registry: &dyn NodeIdRegistry,
) -> Result<GlobalContent, MuxError> {
    let mut content = GlobalContent::default();

    for sentinel in CONTENT_UNKNOWN..=CONTENT_IGNORE {
        content
            .global_to_pool
            .insert(sentinel, (String::new(), sentinel));
    }

    content.item_defs.push(ItemDef::hand());
    let mut next_id: Option<Content> = Some(0);

    for catalogue in catalogues {
        let pool = catalogue.pool;

        mux_item_defs(&mut content, &pool, catalogue.item_defs, catalogue.aliases);
        mux_node_defs(&mut content, &pool, catalogue.node_defs, &mut next_id, registry)?;
        mux_media(&mut content, &pool, catalogue.media);
        for remote in catalogue.remotes {
            if !content.remotes.contains(&remote) {
                content.remotes.push(remote);
            }
        }
    }

    Ok(content)
}

fn mux_item_defs(content: &mut GlobalContent, pool: &str, defs: Vec<ItemDef>, aliases: Vec<Alias>) {
    for mut def in defs {
        if def.name.is_empty() {
            def.name = "hand".to_string();
        }
        namespace::item_def(pool, &mut def);
        content.item_defs.push(def);
    }
    for mut alias in aliases {
        namespace::alias(pool, &mut alias);
        content.aliases.push(alias);
    }
}

fn mux_node_defs(
    content: &mut GlobalContent,
    pool: &str,
    defs: Vec<NodeDef>,
    next_id: &mut Option<Content>,
    registry: &dyn NodeIdRegistry,
) -> Result<(), MuxError> {
    let mut map: HashMap<Content, Content> =
        (CONTENT_UNKNOWN..=CONTENT_IGNORE).map(|id| (id, id)).collect();

    for mut def in defs {
        if is_sentinel_content(def.param0) {
            // Identical everywhere; keep the first copy only.
            if !content.node_defs.iter().any(|d| d.param0 == def.param0) {
                content.node_defs.push(def);
            }
            continue;
        }

        let global = next_id.ok_or(MuxError::IdsExhausted)?;
        *next_id = global.checked_add(1).map(|id| {
            if is_sentinel_content(id) {
                CONTENT_IGNORE + 1
            } else {
                id
            }
        });

        map.insert(def.param0, global);
        content
            .global_to_pool
            .insert(global, (pool.to_string(), def.param0));
        registry.register(&def.name, global);

        def.param0 = global;
        def.connect_to = def
            .connect_to
            .iter()
            .filter_map(|id| map.get(id).copied())
            .collect();
        namespace::node_def(pool, &mut def);
        content.node_defs.push(def);
    }

    content.pool_to_global.insert(pool.to_string(), map);
    Ok(())
}

fn mux_media(content: &mut GlobalContent, pool: &str, media: Vec<MediaFile>) {
    for mut file in media {
        file.name = namespace::prepend(pool, &file.name);
        content
            .media_index
            .insert(file.name.clone(), content.media.len());
        content.media.push(file);
    }
}
