use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ApiMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub auth_rejections: u64,
    pub average_response_time: Duration,
    pub requests_by_endpoint: HashMap<String, EndpointMetrics>,
}

#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
}

/// Outcome of a single API call.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    /// Stable endpoint label; path parameters such as ids are not included.
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub success: bool,
    pub rate_limited: bool,
    pub auth_rejected: bool,
    pub error_type: Option<String>,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            total_response_time: Duration::from_millis(0),
            min_response_time: Duration::MAX,
            max_response_time: Duration::from_millis(0),
        }
    }

    fn update(&mut self, metrics: &RequestMetrics) {
        self.request_count += 1;
        self.total_response_time += metrics.response_time;
        self.min_response_time = self.min_response_time.min(metrics.response_time);
        self.max_response_time = self.max_response_time.max(metrics.response_time);

        if metrics.success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            Duration::from_millis(0)
        } else {
            self.total_response_time / self.request_count as u32
        }
    }
}

impl ApiMetrics {
    /// One-line digest for the shutdown log, endpoints sorted by name.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} requests ({} ok, {} failed, {} rate limited, {} auth rejected), avg {:?}",
            self.total_requests,
            self.successful_requests,
            self.failed_requests,
            self.rate_limited_requests,
            self.auth_rejections,
            self.average_response_time
        );

        let mut endpoints: Vec<_> = self.requests_by_endpoint.iter().collect();
        endpoints.sort_by(|a, b| a.0.cmp(b.0));
        for (name, endpoint) in endpoints {
            summary.push_str(&format!(
                "; {}: {} ok, {} failed, avg {:?}, min {:?}, max {:?}",
                name,
                endpoint.success_count,
                endpoint.error_count,
                endpoint.average_response_time(),
                endpoint.min_response_time,
                endpoint.max_response_time
            ));
        }
        summary
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<ApiMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request_metrics: RequestMetrics) {
        debug!(
            "{} {} -> {} in {:?}",
            request_metrics.method,
            request_metrics.endpoint,
            match (&request_metrics.status_code, &request_metrics.error_type) {
                (Some(status), _) => status.to_string(),
                (None, Some(error_type)) => error_type.clone(),
                (None, None) => "no response".to_string(),
            },
            request_metrics.response_time
        );

        let mut metrics = self.metrics.write().await;

        metrics.total_requests += 1;

        if request_metrics.success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        if request_metrics.rate_limited {
            metrics.rate_limited_requests += 1;
        }
        if request_metrics.auth_rejected {
            metrics.auth_rejections += 1;
        }

        let total_time = metrics.average_response_time * metrics.total_requests as u32
            - metrics.average_response_time
            + request_metrics.response_time;
        metrics.average_response_time = total_time / metrics.total_requests as u32;

        metrics
            .requests_by_endpoint
            .entry(request_metrics.endpoint.clone())
            .or_insert_with(EndpointMetrics::new)
            .update(&request_metrics);
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.read().await.clone()
    }
}
