//! Hierarchical address resolution with a keyed, single-flight cache.
//!
//! Paths are `/`-separated. The first segment selects a root node, every
//! following segment is matched against the browse names of the children:
//! `+` matches every child, `#` matches every Variable below the current
//! node and ends the path, anything else matches by exact name.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use fieldgate_common::ResolvedAddress;

use crate::client::{
    BrowseDirection, BrowseNode, ClientError, ClientResult, NodeClass, ProtocolClient,
};
use crate::config::AddressCacheConfig;
use crate::lifecycle::Lifecycle;

/// Something that can list the children of a namespace node.
#[async_trait]
pub trait BrowseSource: Send + Sync + 'static {
    async fn browse(&self, node: &str, direction: BrowseDirection)
    -> ClientResult<Vec<BrowseNode>>;
}

#[async_trait]
impl<C: ProtocolClient> BrowseSource for Lifecycle<C> {
    async fn browse(
        &self,
        node: &str,
        direction: BrowseDirection,
    ) -> ClientResult<Vec<BrowseNode>> {
        self.connected_client()?
            .browse_children(node, direction)
            .await
    }
}

/// Maps the first path segment to the address of a root node.
pub type RootMap = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves symbolic paths into concrete addresses, memoizing the results.
///
/// Concurrent misses on the same path share one resolution. Failed
/// resolutions are not cached.
pub struct AddressResolver {
    source: Arc<dyn BrowseSource>,
    roots: RootMap,
    browse_timeout: Duration,
    cache: Cache<String, Arc<Vec<ResolvedAddress>>>,
}

impl AddressResolver {
    pub fn new(
        source: Arc<dyn BrowseSource>,
        roots: RootMap,
        config: &AddressCacheConfig,
        browse_timeout: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.maximum_size)
            .time_to_idle(Duration::from_secs(config.expire_after_seconds))
            .build();

        Self {
            source,
            roots,
            browse_timeout,
            cache,
        }
    }

    /// Resolve a path, browsing only on a cache miss.
    pub async fn resolve(&self, path: &str) -> ClientResult<Arc<Vec<ResolvedAddress>>> {
        let key = normalize_path(path);
        self.cache
            .try_get_with(key.clone(), async {
                let resolved = self.load(&key).await?;
                tracing::debug!(path = %key, count = resolved.len(), "Resolved path");
                Ok::<_, ClientError>(Arc::new(resolved))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Forget every cached resolution.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub async fn invalidate(&self, path: &str) {
        self.cache.invalidate(&normalize_path(path)).await;
    }

    /// Number of cached entries, after pending maintenance.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn browse(&self, node: &str) -> ClientResult<Vec<BrowseNode>> {
        tokio::time::timeout(
            self.browse_timeout,
            self.source.browse(node, BrowseDirection::Forward),
        )
        .await
        .map_err(|_| ClientError::Timeout(self.browse_timeout))?
    }

    async fn load(&self, path: &str) -> ClientResult<Vec<ResolvedAddress>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Vec::new());
        };
        let Some(root) = (self.roots)(first) else {
            tracing::warn!(path = %path, root = %first, "Unknown root in path");
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        let mut emitted = HashSet::new();
        let mut frontier = vec![(root, (*first).to_string())];

        for (index, segment) in rest.iter().enumerate() {
            if *segment == "#" {
                let mut visited: HashSet<String> =
                    frontier.iter().map(|(node, _)| node.clone()).collect();
                for (node, browse_path) in frontier {
                    self.collect_variables(node, browse_path, &mut visited, &mut emitted, &mut results)
                        .await?;
                }
                return Ok(results);
            }

            let last = index + 1 == rest.len();
            let mut next = Vec::new();
            for (node, browse_path) in &frontier {
                for child in self.browse(node).await? {
                    if *segment != "+" && child.browse_name != *segment {
                        continue;
                    }
                    let child_path = format!("{}/{}", browse_path, child.browse_name);
                    if !last {
                        next.push((child.address, child_path));
                    } else if child.class == NodeClass::Variable
                        && emitted.insert(child.address.clone())
                    {
                        results.push(ResolvedAddress::new(child.address, child_path));
                    }
                }
            }
            frontier = next;
        }

        Ok(results)
    }

    /// Depth-first walk below `node`, emitting Variables and descending into Objects.
    ///
    /// Each node is visited once, so back-references cannot produce duplicates or loops.
    async fn collect_variables(
        &self,
        node: String,
        browse_path: String,
        visited: &mut HashSet<String>,
        emitted: &mut HashSet<String>,
        results: &mut Vec<ResolvedAddress>,
    ) -> ClientResult<()> {
        let mut stack = vec![(node, browse_path)];

        while let Some((node, browse_path)) = stack.pop() {
            let mut objects = Vec::new();
            for child in self.browse(&node).await? {
                if !visited.insert(child.address.clone()) {
                    continue;
                }
                let child_path = format!("{}/{}", browse_path, child.browse_name);
                match child.class {
                    NodeClass::Variable => {
                        if emitted.insert(child.address.clone()) {
                            results.push(ResolvedAddress::new(child.address, child_path));
                        }
                    }
                    NodeClass::Object => objects.push((child.address, child_path)),
                    _ => {}
                }
            }
            stack.extend(objects.into_iter().rev());
        }

        Ok(())
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Static namespace: node -> children.
    #[derive(Default)]
    struct Namespace {
        children: HashMap<String, Vec<BrowseNode>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail_on: Option<String>,
    }

    impl Namespace {
        fn object(&mut self, parent: &str, address: &str, name: &str) {
            self.link(parent, BrowseNode::new(address, name, NodeClass::Object));
        }

        fn variable(&mut self, parent: &str, address: &str, name: &str) {
            self.link(parent, BrowseNode::new(address, name, NodeClass::Variable));
        }

        fn link(&mut self, parent: &str, node: BrowseNode) {
            self.children.entry(parent.to_string()).or_default().push(node);
        }
    }

    #[async_trait]
    impl BrowseSource for Namespace {
        async fn browse(
            &self,
            node: &str,
            _direction: BrowseDirection,
        ) -> ClientResult<Vec<BrowseNode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_on.as_deref() == Some(node) {
                return Err(ClientError::Communication("browse failed".into()));
            }
            Ok(self.children.get(node).cloned().unwrap_or_default())
        }
    }

    fn plant() -> Namespace {
        let mut ns = Namespace::default();
        ns.object("i=85", "ns=2;s=A", "BoilerA");
        ns.object("i=85", "ns=2;s=B", "BoilerB");
        ns.object("i=85", "ns=2;s=C", "Pump");
        ns.variable("ns=2;s=A", "ns=2;s=A.T", "Temperature");
        ns.variable("ns=2;s=A", "ns=2;s=A.P", "Pressure");
        ns.variable("ns=2;s=B", "ns=2;s=B.T", "Temperature");
        ns.object("ns=2;s=B", "ns=2;s=B.Burner", "Burner");
        ns.variable("ns=2;s=B.Burner", "ns=2;s=B.Burner.On", "On");
        ns.variable("ns=2;s=C", "ns=2;s=C.Speed", "Speed");
        // Back-reference to an ancestor.
        ns.object("ns=2;s=B.Burner", "ns=2;s=B", "BoilerB");
        ns
    }

    fn resolver(ns: Namespace) -> (AddressResolver, Arc<Namespace>) {
        resolver_with(ns, &AddressCacheConfig::default())
    }

    fn resolver_with(
        ns: Namespace,
        config: &AddressCacheConfig,
    ) -> (AddressResolver, Arc<Namespace>) {
        let ns = Arc::new(ns);
        let roots: RootMap = Arc::new(|name: &str| match name {
            "Root" => Some("i=84".to_string()),
            "Objects" => Some("i=85".to_string()),
            _ => None,
        });
        let resolver = AddressResolver::new(
            ns.clone(),
            roots,
            config,
            Duration::from_secs(1),
        );
        (resolver, ns)
    }

    #[tokio::test]
    async fn test_single_level_wildcard() {
        let (resolver, _) = resolver(plant());

        let resolved = resolver.resolve("Objects/+/Temperature").await.unwrap();

        assert_eq!(
            *resolved,
            vec![
                ResolvedAddress::new("ns=2;s=A.T", "Objects/BoilerA/Temperature"),
                ResolvedAddress::new("ns=2;s=B.T", "Objects/BoilerB/Temperature"),
            ]
        );
    }

    #[tokio::test]
    async fn test_literal_path_resolves_at_most_one() {
        let (resolver, _) = resolver(plant());

        let resolved = resolver.resolve("Objects/BoilerB/Burner/On").await.unwrap();
        assert_eq!(
            *resolved,
            vec![ResolvedAddress::new(
                "ns=2;s=B.Burner.On",
                "Objects/BoilerB/Burner/On"
            )]
        );

        let missing = resolver.resolve("Objects/BoilerZ/Temperature").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_objects_are_not_emitted() {
        let (resolver, _) = resolver(plant());
        let resolved = resolver.resolve("Objects/BoilerB").await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_multi_level_wildcard_emits_each_variable_once() {
        let (resolver, _) = resolver(plant());

        let resolved = resolver.resolve("Objects/#").await.unwrap();
        let mut addresses: Vec<&str> = resolved.iter().map(|r| r.address.as_str()).collect();
        addresses.sort();

        assert_eq!(
            addresses,
            vec![
                "ns=2;s=A.P",
                "ns=2;s=A.T",
                "ns=2;s=B.Burner.On",
                "ns=2;s=B.T",
                "ns=2;s=C.Speed",
            ]
        );
    }

    #[tokio::test]
    async fn test_hash_after_wildcard() {
        let (resolver, _) = resolver(plant());
        let resolved = resolver.resolve("Objects/BoilerB/#").await.unwrap();
        let paths: Vec<&str> = resolved.iter().map(|r| r.browse_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Objects/BoilerB/Temperature", "Objects/BoilerB/Burner/On"]
        );
    }

    #[tokio::test]
    async fn test_unknown_root_is_empty() {
        let (resolver, ns) = resolver(plant());
        assert!(resolver.resolve("Nowhere/+").await.unwrap().is_empty());
        assert_eq!(ns.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cached_resolution_does_not_browse_again() {
        let (resolver, ns) = resolver(plant());

        let first = resolver.resolve("Objects/+/Temperature").await.unwrap();
        let calls = ns.calls.load(Ordering::SeqCst);
        let second = resolver.resolve("/Objects/+/Temperature/").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ns.calls.load(Ordering::SeqCst), calls);
        assert_eq!(resolver.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_entries() {
        let config = AddressCacheConfig {
            maximum_size: 1,
            expire_after_seconds: 60,
        };
        let (resolver, _) = resolver_with(plant(), &config);

        resolver.resolve("Objects/+/Temperature").await.unwrap();
        resolver.resolve("Objects/BoilerB/#").await.unwrap();

        assert_eq!(resolver.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_entries_are_browsed_again() {
        let config = AddressCacheConfig {
            maximum_size: 10,
            expire_after_seconds: 1,
        };
        let (resolver, ns) = resolver_with(plant(), &config);

        let first = resolver.resolve("Objects/+/Temperature").await.unwrap();
        let calls = ns.calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1300)).await;
        let second = resolver.resolve("Objects/+/Temperature").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ns.calls.load(Ordering::SeqCst), calls * 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let mut ns = plant();
        ns.delay = Some(Duration::from_millis(20));
        let (resolver, ns) = resolver(ns);
        let resolver = Arc::new(resolver);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("Objects/+/Temperature").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 2);
        }

        // One browse of Objects plus one per boiler/pump.
        assert_eq!(ns.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mut ns = plant();
        ns.fail_on = Some("ns=2;s=B".to_string());
        let (resolver, ns) = resolver(ns);

        assert!(resolver.resolve("Objects/+/Temperature").await.is_err());
        let calls = ns.calls.load(Ordering::SeqCst);
        assert!(resolver.resolve("Objects/+/Temperature").await.is_err());
        assert!(ns.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test]
    async fn test_browse_timeout() {
        let mut ns = plant();
        ns.delay = Some(Duration::from_millis(200));
        let ns = Arc::new(ns);
        let roots: RootMap = Arc::new(|_: &str| Some("i=85".to_string()));
        let resolver = AddressResolver::new(
            ns,
            roots,
            &AddressCacheConfig::default(),
            Duration::from_millis(10),
        );

        let result = resolver.resolve("Objects/+").await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }
}
