//! AWS cloud inventory
//!
//! Backs [`CloudInventory`] with three service clients:
//!
//! ```text
//! AwsInventory
//! ├── autoscaling  groups, instance → group index, detach
//! ├── ec2          instance details, private DNS lookup, terminate
//! └── eks          managed clusters by name / endpoint
//! ```
//!
//! Every list call walks the SDK paginator to the end. Errors are rendered
//! with `DisplayErrorContext` so the service's error code and message reach
//! the log instead of a bare "service error".

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_autoscaling::types::AutoScalingGroup;
use aws_sdk_autoscaling::Client as AutoScalingClient;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_eks::Client as EksClient;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use rotator_core::{
    error::exactly_one, normalize_endpoint, CloudInventory, Group, Instance, ManagedCluster,
    Result, RotatorError,
};
use tracing::{debug, info, instrument};

/// EC2 filter matching an instance's private DNS name
const PRIVATE_DNS_FILTER: &str = "network-interface.private-dns-name";

/// Instance IDs per DescribeInstances call
const DESCRIBE_INSTANCES_CHUNK: usize = 100;

/// Load the shared AWS config, optionally pinned to a region and profile
pub async fn load_sdk_config(region: Option<String>, profile: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    loader.load().await
}

/// Cloud inventory over Auto Scaling, EC2 and EKS
#[derive(Clone)]
pub struct AwsInventory {
    autoscaling: AutoScalingClient,
    ec2: Ec2Client,
    eks: EksClient,
}

impl AwsInventory {
    /// Create from a loaded AWS config
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            autoscaling: AutoScalingClient::new(sdk_config),
            ec2: Ec2Client::new(sdk_config),
            eks: EksClient::new(sdk_config),
        }
    }

    /// Describe a managed cluster by name
    pub async fn describe_managed_cluster(&self, name: &str) -> Result<ManagedCluster> {
        let output = self
            .eks
            .describe_cluster()
            .name(name)
            .send()
            .await
            .map_err(|e| RotatorError::cloud_query("DescribeCluster", DisplayErrorContext(e)))?;

        let cluster = output
            .cluster()
            .ok_or_else(|| RotatorError::not_found("EKS cluster", name))?;
        Ok(ManagedCluster::new(
            cluster.name().unwrap_or(name),
            cluster.endpoint().unwrap_or_default(),
        ))
    }

    /// Names of all managed clusters in the region
    pub async fn list_managed_clusters(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pages = self.eks.list_clusters().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| RotatorError::cloud_query("ListClusters", DisplayErrorContext(e)))?;
            names.extend(page.clusters().iter().cloned());
        }
        Ok(names)
    }

    async fn describe_groups(&self, names: &[&str]) -> Result<Vec<Group>> {
        let mut request = self.autoscaling.describe_auto_scaling_groups();
        for name in names {
            request = request.auto_scaling_group_names(*name);
        }

        let mut groups = Vec::new();
        let mut pages = request.into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                RotatorError::cloud_query("DescribeAutoScalingGroups", DisplayErrorContext(e))
            })?;
            groups.extend(page.auto_scaling_groups().iter().map(group_from_sdk));
        }
        Ok(groups)
    }

    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<Instance>> {
        let mut instances = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(DESCRIBE_INSTANCES_CHUNK) {
            let mut pages = self
                .ec2
                .describe_instances()
                .set_instance_ids(Some(chunk.to_vec()))
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| {
                    RotatorError::cloud_query("DescribeInstances", DisplayErrorContext(e))
                })?;
                instances.extend(
                    page.reservations()
                        .iter()
                        .flat_map(|r| r.instances().iter())
                        .filter_map(instance_from_sdk),
                );
            }
        }
        Ok(instances)
    }
}

/// Convert an SDK group, keeping name, tags and member instance IDs
fn group_from_sdk(group: &AutoScalingGroup) -> Group {
    let tags = group
        .tags()
        .iter()
        .filter_map(|t| Some((t.key()?, t.value().unwrap_or_default())));
    let members = group.instances().iter().map(|i| i.instance_id());
    build_group(group.auto_scaling_group_name(), tags, members)
}

fn build_group<'a>(
    name: &str,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
    members: impl Iterator<Item = &'a str>,
) -> Group {
    let mut group = Group::new(name);
    for (key, value) in tags {
        group = group.with_tag(key, value);
    }
    for id in members {
        group = group.with_instance(id);
    }
    group
}

/// Convert an SDK instance; `None` without an ID or launch time
fn instance_from_sdk(instance: &aws_sdk_ec2::types::Instance) -> Option<Instance> {
    let id = instance.instance_id()?;
    let launch_time = instance
        .launch_time()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))?;

    let mut converted = Instance::new(id, launch_time);
    if let Some(dns) = instance.private_dns_name().filter(|s| !s.is_empty()) {
        converted = converted.with_internal_name(dns);
    }
    Some(converted)
}

#[async_trait]
impl CloudInventory for AwsInventory {
    async fn list_groups(&self) -> Result<Vec<Group>> {
        let groups = self.describe_groups(&[]).await?;
        debug!(group_count = groups.len(), "Listed autoscaling groups");
        Ok(groups)
    }

    async fn describe_group(&self, name: &str) -> Result<Group> {
        let groups = self.describe_groups(&[name]).await?;
        exactly_one(groups, "ASG", name)
    }

    async fn list_instances_for_group(&self, group: &Group) -> Result<Vec<Instance>> {
        if group.instances.is_empty() {
            debug!(group = %group.name, "Group has no instances");
            return Ok(Vec::new());
        }
        let instances = self.describe_instances(&group.instances).await?;
        Ok(instances
            .into_iter()
            .map(|i| i.with_group(group.name.clone()))
            .collect())
    }

    #[instrument(skip(self))]
    async fn find_instance_by_internal_name(&self, name: &str) -> Result<Instance> {
        let filter = Filter::builder()
            .name(PRIVATE_DNS_FILTER)
            .values(name)
            .build();

        let mut found = Vec::new();
        let mut pages = self
            .ec2
            .describe_instances()
            .filters(filter)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                RotatorError::cloud_query("DescribeInstances", DisplayErrorContext(e))
            })?;
            found.extend(
                page.reservations()
                    .iter()
                    .flat_map(|r| r.instances().iter())
                    .filter_map(instance_from_sdk),
            );
        }

        exactly_one(found, "instance with internal DNS", name)
    }

    #[instrument(skip(self))]
    async fn find_group_owning_instance(&self, instance_id: &str) -> Result<Group> {
        let output = self
            .autoscaling
            .describe_auto_scaling_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                RotatorError::cloud_query("DescribeAutoScalingInstances", DisplayErrorContext(e))
            })?;

        let names: Vec<String> = output
            .auto_scaling_instances()
            .iter()
            .map(|details| details.auto_scaling_group_name().to_string())
            .collect();
        let name = exactly_one(names, "ASG for instance", instance_id)?;
        self.describe_group(&name).await
    }

    async fn detach(
        &self,
        group: &str,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> Result<()> {
        self.autoscaling
            .detach_instances()
            .auto_scaling_group_name(group)
            .instance_ids(instance_id)
            .should_decrement_desired_capacity(decrement_desired_capacity)
            .send()
            .await
            .map_err(|e| RotatorError::cloud_action("DetachInstances", DisplayErrorContext(e)))?;

        info!(
            group = %group,
            instance_id = %instance_id,
            decrement_desired_capacity,
            "Instance detached"
        );
        Ok(())
    }

    async fn terminate(&self, instance_id: &str) -> Result<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                RotatorError::cloud_action("TerminateInstances", DisplayErrorContext(e))
            })?;

        info!("Instance {} termination initiated", instance_id);
        Ok(())
    }

    async fn find_managed_cluster_by_endpoint(&self, endpoint: &str) -> Result<ManagedCluster> {
        let wanted = normalize_endpoint(endpoint);
        for name in self.list_managed_clusters().await? {
            let cluster = self.describe_managed_cluster(&name).await?;
            debug!(
                cluster = %cluster.name,
                endpoint = %cluster.endpoint,
                "Checking cluster endpoint"
            );
            if normalize_endpoint(&cluster.endpoint) == wanted {
                return Ok(cluster);
            }
        }
        Err(RotatorError::not_found("EKS cluster with endpoint", endpoint))
    }
}
