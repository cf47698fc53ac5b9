use crate::listener::{guarded, PointCloudListeners};
use crate::sdk::{PointCloudCallback, TangoSdk};
use crate::types::{PointCloud, SharedPointCloud};
use crate::{Result, TangoError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Holds the newest depth cloud and hands snapshots to listeners once per tick.
pub struct PointCloudManager {
    sdk: Arc<dyn TangoSdk>,
    capacity: usize,
    incoming: Arc<Mutex<Option<PointCloud>>>,
    latest: Option<SharedPointCloud>,
}

impl PointCloudManager {
    pub fn new(sdk: Arc<dyn TangoSdk>, max_points: u32) -> Self {
        log::info!("Creating point cloud manager (capacity {})", max_points);
        Self {
            sdk,
            capacity: max_points as usize,
            incoming: Arc::new(Mutex::new(None)),
            latest: None,
        }
    }

    pub fn max_vertex_capacity(&self) -> usize {
        self.capacity
    }

    /// Register the depth callback with the service.
    pub fn connect_callback(&self) -> Result<()> {
        let incoming = self.incoming.clone();
        let capacity = self.capacity;
        let callback: PointCloudCallback = Arc::new(move |cloud: &PointCloud| {
            let n = cloud.points.len().min(capacity);
            *incoming.lock() = Some(PointCloud {
                timestamp: cloud.timestamp,
                points: cloud.points[..n].to_vec(),
            });
        });
        self.sdk
            .connect_on_point_cloud(callback)
            .map_err(TangoError::sdk("connect_on_point_cloud"))
    }

    /// Newest published snapshot. Valid until the next tick replaces it.
    pub fn latest(&self) -> Option<SharedPointCloud> {
        self.latest.clone()
    }

    /// Publish the newest cloud, if one arrived since the last tick.
    pub fn tick(&mut self, listeners: &PointCloudListeners) -> bool {
        let Some(cloud) = self.incoming.lock().take() else {
            return false;
        };
        let snapshot: SharedPointCloud = Arc::new(cloud);
        log::trace!("Point cloud with {} points at {}", snapshot.len(), snapshot.timestamp);
        for (id, listener, _) in listeners.iter() {
            guarded("point cloud", id, || listener.on_point_cloud(&snapshot));
        }
        self.latest = Some(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::listener::PointCloudListener;
    use crate::sim::SimulatedSdk;
    use std::sync::Weak;

    #[derive(Default)]
    struct Counter(Mutex<Vec<usize>>);

    impl PointCloudListener for Counter {
        fn on_point_cloud(&self, cloud: &SharedPointCloud) {
            self.0.lock().push(cloud.len());
        }
    }

    fn cloud(n: usize, ts: f64) -> PointCloud {
        PointCloud {
            timestamp: ts,
            points: vec![[0.0, 0.0, 1.0, 1.0]; n],
        }
    }

    #[test]
    fn test_truncates_to_capacity_and_keeps_newest() {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.connect(&Config::default()).unwrap();
        let mut manager = PointCloudManager::new(sdk.clone(), 100);
        manager.connect_callback().unwrap();

        let counter = Arc::new(Counter::default());
        let mut listeners = PointCloudListeners::new();
        listeners.add(Arc::downgrade(&counter) as Weak<dyn PointCloudListener>, ());

        assert!(sdk.emit_point_cloud(&cloud(10, 1.0)));
        assert!(sdk.emit_point_cloud(&cloud(250, 2.0)));
        assert!(manager.tick(&listeners));
        assert!(!manager.tick(&listeners));

        assert_eq!(*counter.0.lock(), vec![100]);
        let latest = manager.latest().unwrap();
        assert_eq!(latest.timestamp, 2.0);
        assert_eq!(latest.len(), 100);
    }

    #[test]
    fn test_connect_requires_service() {
        let sdk = Arc::new(SimulatedSdk::new());
        let manager = PointCloudManager::new(sdk, 10);
        assert!(matches!(
            manager.connect_callback(),
            Err(TangoError::Sdk { call: "connect_on_point_cloud", .. })
        ));
    }
}
