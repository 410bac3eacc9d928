//! Consumer-side partition assignment.

use crate::error::PartitionError;
use crate::properties::ConsumerProperties;

/// The partitions one consumer instance is responsible for.
///
/// Instance `i` of `n` owns every partition `p` with `p % n == i`. More
/// instances than partitions would leave some instances idle, so that
/// topology is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAssignment {
    instance_index: u32,
    instance_count: u32,
    partition_count: u32,
}

impl PartitionAssignment {
    pub fn new(
        instance_index: i32,
        instance_count: i32,
        partition_count: i32,
    ) -> Result<Self, PartitionError> {
        if partition_count <= 0 {
            return Err(PartitionError::NonPositivePartitionCount(partition_count));
        }
        if instance_count <= 0 || instance_index < 0 || instance_index >= instance_count {
            return Err(PartitionError::InvalidInstanceIndex {
                index: instance_index,
                count: instance_count,
            });
        }
        if instance_count > partition_count {
            return Err(PartitionError::InstanceCountExceedsPartitions {
                instances: instance_count,
                partitions: partition_count,
            });
        }

        Ok(Self {
            instance_index: instance_index as u32,
            instance_count: instance_count as u32,
            partition_count: partition_count as u32,
        })
    }

    /// `None` for an unpartitioned consumer, which receives everything.
    pub fn from_properties(props: &ConsumerProperties) -> Result<Option<Self>, PartitionError> {
        if !props.partitioned {
            return Ok(None);
        }
        Self::new(
            props.instance_index,
            props.instance_count,
            props.partition_count,
        )
        .map(Some)
    }

    pub fn owns(&self, partition: u32) -> bool {
        partition < self.partition_count && partition % self.instance_count == self.instance_index
    }

    pub fn partitions(&self) -> Vec<u32> {
        (self.instance_index..self.partition_count)
            .step_by(self.instance_count as usize)
            .collect()
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }
}
