//! Greedy seed-radius clustering of complaints.
//!
//! Complaints are partitioned by exact issue text, then each issue group is
//! swept once in input order: the first unclaimed complaint seeds a cluster
//! and claims every unclaimed complaint within `radius_m` of the seed.
//! Membership depends on input order and is not globally optimal.

use civicops_common::{centroid, issue_key, Complaint, GeoPoint};

/// A non-empty group of same-issue complaints. `members[0]` is the seed.
#[derive(Debug, Clone)]
pub struct Cluster<'a> {
    pub issue: &'a str,
    pub members: Vec<&'a Complaint>,
}

impl<'a> Cluster<'a> {
    pub fn seed(&self) -> &'a Complaint {
        self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Arithmetic mean of member coordinates.
    pub fn center(&self) -> GeoPoint {
        centroid(self.members.iter().map(|c| &c.location)).unwrap_or(self.seed().location)
    }
}

/// Group complaints by issue, preserving first-appearance order of issues and
/// input order within each group.
pub fn group_by_issue(complaints: &[Complaint]) -> Vec<(&str, Vec<&Complaint>)> {
    let mut groups: Vec<(&str, Vec<&Complaint>)> = Vec::new();
    for complaint in complaints {
        match groups.iter_mut().find(|(issue, _)| *issue == complaint.issue) {
            Some((_, members)) => members.push(complaint),
            None => groups.push((complaint.issue.as_str(), vec![complaint])),
        }
    }
    groups
}

/// Single seed-radius pass over one issue group.
fn cluster_group<'a>(issue: &'a str, group: &[&'a Complaint], radius_m: f64) -> Vec<Cluster<'a>> {
    let mut claimed = vec![false; group.len()];
    let mut clusters = Vec::new();

    for i in 0..group.len() {
        if claimed[i] {
            continue;
        }
        claimed[i] = true;
        let seed = group[i];
        let mut members = vec![seed];

        for j in (i + 1)..group.len() {
            if !claimed[j] && seed.location.distance_to(&group[j].location) <= radius_m {
                claimed[j] = true;
                members.push(group[j]);
            }
        }

        clusters.push(Cluster { issue, members });
    }

    clusters
}

/// Cluster complaints of the same issue lying within `radius_m` of a seed.
/// Every input complaint lands in exactly one cluster.
pub fn cluster_complaints(complaints: &[Complaint], radius_m: f64) -> Vec<Cluster<'_>> {
    group_by_issue(complaints)
        .into_iter()
        .flat_map(|(issue, group)| cluster_group(issue, &group, radius_m))
        .collect()
}

/// Complaints within `radius_m` of a fixed point, in input order. With
/// `issue` set, only complaints whose normalised issue matches are kept.
pub fn complaints_near<'a>(
    complaints: &'a [Complaint],
    location: GeoPoint,
    radius_m: f64,
    issue: Option<&str>,
) -> Vec<&'a Complaint> {
    let wanted = issue.map(issue_key);
    complaints
        .iter()
        .filter(|c| match &wanted {
            Some(key) => issue_key(&c.issue) == *key,
            None => true,
        })
        .filter(|c| location.distance_to(&c.location) <= radius_m)
        .collect()
}
