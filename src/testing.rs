//! In-memory stand-ins for the vendor APIs.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::forge::data_management::{DocumentRef, DocumentVersion, ItemInfo, StorageRef, StorageSlot};
use crate::forge::design_automation::{
    Activity, Alias, AppBundle, AppBundleSpec, UploadParameters, WorkItem, WorkItemStatus, WorkItemSubmission,
};
use crate::forge::user::UserProfile;
use crate::forge::{AccessToken, AutomationService, DocumentVersions, ForgeError, ServiceCredentials, UserProfiles};
use crate::storage::{BlobStore, BucketInfo, ObjectInfo, RetentionPolicy, StorageError, StorageResult};

pub const TIP_STORAGE_ID: &str = "urn:adsk.objects:os.object:wip.dm.prod/tip.rvt";
pub const SLOT_STORAGE_ID: &str = "urn:adsk.objects:os.object:wip.dm.prod/slot.rvt";

fn unavailable(endpoint: &str) -> ForgeError {
    ForgeError::Api {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "unavailable".to_string(),
    }
}

/// Automation service keeping definitions in memory
pub struct FakeAutomation {
    nickname: String,
    alias: String,
    calls: Mutex<Vec<String>>,
    bundles: Mutex<Vec<String>>,
    versions: Mutex<HashMap<String, u32>>,
    activities: Mutex<Vec<String>>,
    created_activities: Mutex<Vec<Activity>>,
    engines: Mutex<Vec<String>>,
    work_items: Mutex<Vec<WorkItem>>,
    blank_ids: Mutex<bool>,
}

impl FakeAutomation {
    pub fn new(nickname: &str, alias: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            alias: alias.to_string(),
            calls: Mutex::new(Vec::new()),
            bundles: Mutex::new(Vec::new()),
            versions: Mutex::new(HashMap::new()),
            activities: Mutex::new(Vec::new()),
            created_activities: Mutex::new(Vec::new()),
            engines: Mutex::new(Vec::new()),
            work_items: Mutex::new(Vec::new()),
            blank_ids: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn seed_activities(&self, ids: &[&str]) {
        self.activities.lock().extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn seed_engines(&self, ids: &[&str]) {
        self.engines.lock().extend(ids.iter().map(|s| s.to_string()));
    }

    pub fn last_activity(&self) -> Option<Activity> {
        self.created_activities.lock().last().cloned()
    }

    pub fn work_items(&self) -> Vec<WorkItem> {
        self.work_items.lock().clone()
    }

    /// Accept work items but answer without an id
    pub fn return_blank_work_item_ids(&self) {
        *self.blank_ids.lock() = true;
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn next_version(&self, name: &str) -> AppBundle {
        let mut versions = self.versions.lock();
        let version = versions.entry(name.to_string()).or_insert(0);
        *version += 1;

        let mut form_data = BTreeMap::new();
        form_data.insert("key".to_string(), format!("{}/{}", name, version));
        AppBundle {
            version: *version,
            upload_parameters: UploadParameters {
                endpoint_url: "https://upload.example".to_string(),
                form_data,
            },
        }
    }
}

#[async_trait]
impl AutomationService for FakeAutomation {
    async fn engines(&self) -> Result<Vec<String>, ForgeError> {
        self.log("engines".into());
        Ok(self.engines.lock().clone())
    }

    async fn app_bundles(&self) -> Result<Vec<String>, ForgeError> {
        self.log("app_bundles".into());
        Ok(self.bundles.lock().clone())
    }

    async fn create_app_bundle(&self, spec: &AppBundleSpec) -> Result<AppBundle, ForgeError> {
        let name = spec.id.clone().unwrap_or_default();
        self.log(format!("create_app_bundle {}", name));
        self.bundles
            .lock()
            .push(format!("{}.{}+{}", self.nickname, name, self.alias));
        Ok(self.next_version(&name))
    }

    async fn create_app_bundle_version(&self, name: &str, _spec: &AppBundleSpec) -> Result<AppBundle, ForgeError> {
        self.log(format!("create_app_bundle_version {}", name));
        Ok(self.next_version(name))
    }

    async fn create_app_bundle_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError> {
        self.log(format!("create_app_bundle_alias {} {}->{}", name, alias.id, alias.version));
        Ok(alias.clone())
    }

    async fn modify_app_bundle_alias(&self, name: &str, alias_id: &str, version: u32) -> Result<Alias, ForgeError> {
        self.log(format!("modify_app_bundle_alias {} {}->{}", name, alias_id, version));
        Ok(Alias {
            id: alias_id.to_string(),
            version,
        })
    }

    async fn upload_app_bundle(
        &self,
        _params: &UploadParameters,
        file_name: &str,
        _package: Bytes,
    ) -> Result<(), ForgeError> {
        self.log(format!("upload_app_bundle {}", file_name));
        Ok(())
    }

    async fn activities(&self) -> Result<Vec<String>, ForgeError> {
        self.log("activities".into());
        Ok(self.activities.lock().clone())
    }

    async fn create_activity(&self, spec: &Activity) -> Result<Activity, ForgeError> {
        self.log(format!("create_activity {}", spec.id));
        self.activities
            .lock()
            .push(format!("{}.{}+{}", self.nickname, spec.id, self.alias));
        self.created_activities.lock().push(spec.clone());
        Ok(spec.clone())
    }

    async fn create_activity_alias(&self, name: &str, alias: &Alias) -> Result<Alias, ForgeError> {
        self.log(format!("create_activity_alias {} {}->{}", name, alias.id, alias.version));
        Ok(alias.clone())
    }

    async fn create_work_item(&self, item: &WorkItem) -> Result<WorkItemSubmission, ForgeError> {
        let mut items = self.work_items.lock();
        items.push(item.clone());
        let id = if *self.blank_ids.lock() {
            String::new()
        } else {
            format!("wi-{}", items.len())
        };
        Ok(WorkItemSubmission {
            id,
            status: WorkItemStatus::Pending,
        })
    }

    async fn delete_app(&self) -> Result<(), ForgeError> {
        self.log("delete_app".into());
        self.bundles.lock().clear();
        self.activities.lock().clear();
        Ok(())
    }
}

/// Blob store keeping objects in memory.
///
/// Signed URLs have the form `https://signed.example/<bucket>/<object>` and
/// resolve back to the stored object through `fetch_url`.
pub struct FakeBlobStore {
    fail: bool,
    buckets: Mutex<HashSet<String>>,
    objects: Mutex<BTreeMap<(String, String), Bytes>>,
    urls: Mutex<HashMap<String, Bytes>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self {
            fail: false,
            buckets: Mutex::new(HashSet::new()),
            objects: Mutex::new(BTreeMap::new()),
            urls: Mutex::new(HashMap::new()),
        }
    }

    /// Every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn seed_bucket(&self, bucket: &str) {
        self.buckets.lock().insert(bucket.to_string());
    }

    pub fn seed_object(&self, bucket: &str, object: &str, content: &str) {
        self.seed_bucket(bucket);
        self.objects.lock().insert(
            (bucket.to_string(), object.to_string()),
            Bytes::from(content.to_string()),
        );
    }

    pub fn seed_url(&self, url: &str, content: &str) {
        self.urls.lock().insert(url.to_string(), Bytes::from(content.to_string()));
    }

    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, o)| o.clone())
            .collect()
    }

    fn check(&self, what: &str) -> StorageResult<()> {
        if self.fail {
            Err(StorageError::Other(format!("{} unavailable", what)))
        } else {
            Ok(())
        }
    }

    fn info(bucket: &str, object: &str, size: usize) -> ObjectInfo {
        ObjectInfo {
            bucket_key: bucket.to_string(),
            object_key: object.to_string(),
            object_id: format!("urn:adsk.objects:os.object:{}/{}", bucket, object),
            size: Some(size as u64),
            sha1: None,
            location: None,
        }
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn list_buckets(&self, _token: &AccessToken) -> StorageResult<Vec<BucketInfo>> {
        self.check("buckets")?;
        let mut keys: Vec<String> = self.buckets.lock().iter().cloned().collect();
        keys.sort();
        Ok(keys
            .into_iter()
            .map(|bucket_key| BucketInfo {
                bucket_key,
                created_date: None,
                policy_key: Some("transient".to_string()),
            })
            .collect())
    }

    async fn create_bucket(
        &self,
        _token: &AccessToken,
        bucket_key: &str,
        policy: RetentionPolicy,
    ) -> StorageResult<BucketInfo> {
        self.check(bucket_key)?;
        if !self.buckets.lock().insert(bucket_key.to_string()) {
            return Err(StorageError::AlreadyExists(bucket_key.to_string()));
        }
        Ok(BucketInfo {
            bucket_key: bucket_key.to_string(),
            created_date: None,
            policy_key: serde_json::to_value(policy)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string)),
        })
    }

    async fn list_objects(&self, _token: &AccessToken, bucket_key: &str) -> StorageResult<Vec<ObjectInfo>> {
        self.check(bucket_key)?;
        if !self.buckets.lock().contains(bucket_key) {
            return Err(StorageError::NotFound(bucket_key.to_string()));
        }
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((b, _), _)| b == bucket_key)
            .map(|((b, o), data)| Self::info(b, o, data.len()))
            .collect())
    }

    async fn put(
        &self,
        _token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        data: Bytes,
    ) -> StorageResult<ObjectInfo> {
        self.check(bucket_key)?;
        let info = Self::info(bucket_key, object_name, data.len());
        self.objects
            .lock()
            .insert((bucket_key.to_string(), object_name.to_string()), data);
        Ok(info)
    }

    async fn signed_url(
        &self,
        _token: &AccessToken,
        bucket_key: &str,
        object_name: &str,
        _minutes: u32,
    ) -> StorageResult<String> {
        self.check(bucket_key)?;
        Ok(format!("https://signed.example/{}/{}", bucket_key, object_name))
    }

    async fn fetch_url(&self, url: &str) -> StorageResult<Bytes> {
        self.check(url)?;
        if let Some(data) = self.urls.lock().get(url) {
            return Ok(data.clone());
        }

        let signed = url
            .strip_prefix("https://signed.example/")
            .and_then(|rest| rest.split_once('/'));
        match signed {
            Some((bucket, object)) => self
                .objects
                .lock()
                .get(&(bucket.to_string(), object.to_string()))
                .cloned()
                .ok_or_else(|| StorageError::NotFound(url.to_string())),
            None => Err(StorageError::NotFound(url.to_string())),
        }
    }

    fn object_url(&self, bucket_key: &str, object_name: &str) -> String {
        format!("https://oss.example/{}/{}", bucket_key, object_name)
    }
}

/// Document backend with one item holding one version
pub struct FakeDocuments {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeDocuments {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn log(&self, call: String, endpoint: &str) -> Result<(), ForgeError> {
        self.calls.lock().push(call);
        if self.fail {
            Err(unavailable(endpoint))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentVersions for FakeDocuments {
    async fn get_item(&self, _token: &AccessToken, doc: &DocumentRef) -> Result<ItemInfo, ForgeError> {
        self.log(format!("get_item {}", doc.item_id), "GET item")?;
        Ok(ItemInfo {
            item_id: doc.item_id.clone(),
            folder_id: "urn:folder".to_string(),
            display_name: "Family.rvt".to_string(),
        })
    }

    async fn list_versions(&self, _token: &AccessToken, doc: &DocumentRef) -> Result<Vec<DocumentVersion>, ForgeError> {
        self.log(format!("list_versions {}", doc.item_id), "GET item versions")?;
        Ok(vec![DocumentVersion {
            item_id: doc.item_id.clone(),
            version_id: format!("{}?version=2", doc.item_id),
            version_number: Some(2),
            storage_id: Some(TIP_STORAGE_ID.to_string()),
            last_modified_time: None,
            last_modified_user: None,
        }])
    }

    async fn allocate_storage(
        &self,
        _token: &AccessToken,
        project_id: &str,
        item: &ItemInfo,
    ) -> Result<StorageSlot, ForgeError> {
        self.log(format!("allocate_storage {}", project_id), "POST storage")?;
        Ok(StorageSlot {
            storage_id: SLOT_STORAGE_ID.to_string(),
            storage: StorageRef::parse(SLOT_STORAGE_ID)?,
            item_id: item.item_id.clone(),
            file_name: item.display_name.clone(),
        })
    }

    async fn create_version(
        &self,
        _token: &AccessToken,
        project_id: &str,
        slot: &StorageSlot,
        acting_user: Option<&str>,
    ) -> Result<DocumentVersion, ForgeError> {
        self.log(
            format!(
                "create_version {} {} as {}",
                project_id,
                slot.item_id,
                acting_user.unwrap_or("-")
            ),
            "POST version",
        )?;
        Ok(DocumentVersion {
            item_id: slot.item_id.clone(),
            version_id: format!("{}?version=3", slot.item_id),
            version_number: Some(3),
            storage_id: Some(slot.storage_id.clone()),
            last_modified_time: None,
            last_modified_user: acting_user.map(str::to_string),
        })
    }
}

pub struct FakeProfiles {
    user_id: String,
}

impl FakeProfiles {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl UserProfiles for FakeProfiles {
    async fn current_user(&self, _token: &AccessToken) -> Result<UserProfile, ForgeError> {
        Ok(UserProfile {
            name: "Test User".to_string(),
            picture: None,
            id: self.user_id.clone(),
        })
    }
}

pub struct FakeCredentials;

impl FakeCredentials {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceCredentials for FakeCredentials {
    async fn service_token(&self) -> Result<AccessToken, ForgeError> {
        Ok(AccessToken::new("service-token"))
    }
}
