use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use recruitment_backend::auth::jwt::JwtService;
use recruitment_backend::auth::password;
use recruitment_backend::config::{AppConfig, DEFAULT_MAX_UPLOAD_BYTES};
use recruitment_backend::db::{self, PgPool};
use recruitment_backend::error::DomainResult;
use recruitment_backend::models::{NewCompany, NewUser};
use recruitment_backend::routes;
use recruitment_backend::schema::{candidates, companies, departments, positions};
use recruitment_backend::state::AppState;
use recruitment_backend::storage::ObjectStorage;
use recruitment_backend::store::{MemorySnapshot, MemoryStore, PgStore, Store, StoreTx};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

static TEST_PASSWORD_HASH: Lazy<String> =
    Lazy::new(|| password::hash_password(TEST_PASSWORD).expect("hash test password"));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    failing_deletes: Mutex<HashSet<String>>,
    fail_puts: Mutex<bool>,
    puts: Mutex<usize>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String> {
        *self.puts.lock().await += 1;
        ensure!(!*self.fail_puts.lock().await, "storage rejected {key}");
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(format!("https://fake-storage/{key}"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().await.contains(key) {
            return Err(anyhow!("storage refused to delete {key}"));
        }
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

#[allow(dead_code)]
impl FakeStorage {
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    pub async fn put_count(&self) -> usize {
        *self.puts.lock().await
    }

    pub async fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().await.insert(key.to_string());
    }

    pub async fn heal(&self) {
        self.failing_deletes.lock().await.clear();
        *self.fail_puts.lock().await = false;
    }

    pub async fn fail_puts(&self) {
        *self.fail_puts.lock().await = true;
    }
}

/// A company with one signed-in user.
#[allow(dead_code)]
pub struct Tenant {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    memory: Option<Arc<MemoryStore>>,
    pool: Option<PgPool>,
    storage: Arc<FakeStorage>,
}

/// Row totals of the recruitment tables.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub companies: i64,
    pub departments: i64,
    pub positions: i64,
    pub candidates: i64,
}

#[allow(dead_code)]
impl TestApp {
    /// An app over the in-memory store.
    pub async fn new() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let store_for_state: Arc<dyn Store> = store.clone();
        Self::build(
            test_config("postgres://unused".to_string()),
            store_for_state,
            Some(store),
            None,
        )
    }

    /// An app over PostgreSQL at `TEST_DATABASE_URL`, migrated and emptied.
    /// Returns `None` when the variable is unset. Hold [`acquire_db_lock`]
    /// for the whole test.
    pub async fn postgres() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping postgres test");
            return Ok(None);
        };

        let config = test_config(database_url);
        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
        Self::build(config, store, None, Some(pool)).map(Some)
    }

    fn build(
        config: AppConfig,
        store: Arc<dyn Store>,
        memory: Option<Arc<MemoryStore>>,
        pool: Option<PgPool>,
    ) -> Result<Self> {
        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(store, config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            memory,
            pool,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        if self.pool.is_none() {
            return Ok(());
        }
        self.with_conn(truncate_all).await
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        self.memory
            .as_ref()
            .expect("snapshots need the in-memory store")
            .snapshot()
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone().expect("pool needs the postgres store")
    }

    /// Runs `read` in its own transaction, which is then discarded.
    pub fn read<T>(&self, read: impl FnOnce(&mut dyn StoreTx) -> DomainResult<T>) -> Result<T> {
        let mut tx = self.store().begin()?;
        let value = read(tx.as_mut())?;
        tx.rollback()?;
        Ok(value)
    }

    pub async fn row_counts(&self) -> Result<RowCounts> {
        self.with_conn(|conn| {
            Ok(RowCounts {
                companies: companies::table.count().get_result(conn)?,
                departments: departments::table.count().get_result(conn)?,
                positions: positions::table.count().get_result(conn)?,
                candidates: candidates::table.count().get_result(conn)?,
            })
        })
        .await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }

    pub fn insert_company(&self, name: &str) -> Result<Uuid> {
        let mut tx = self.store().begin()?;
        let company = tx.insert_company(NewCompany {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: format!("{name} HQ"),
        })?;
        tx.commit()?;
        Ok(company.id)
    }

    pub fn insert_user(&self, email: &str, company_id: Option<Uuid>) -> Result<Uuid> {
        let mut tx = self.store().begin()?;
        let user = tx.insert_user(NewUser {
            id: Uuid::new_v4(),
            company_id,
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password_hash: TEST_PASSWORD_HASH.clone(),
            phone: String::new(),
        })?;
        tx.commit()?;
        Ok(user.id)
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = read_json(response).await?;
        Ok(parsed.access_token)
    }

    pub async fn tenant(&self, name: &str) -> Result<Tenant> {
        let company_id = self.insert_company(name)?;
        let email = format!("admin@{}.test", name.to_lowercase().replace(' ', "-"));
        let user_id = self.insert_user(&email, Some(company_id))?;
        let token = self.login_token(&email, TEST_PASSWORD).await?;
        Ok(Tenant {
            company_id,
            user_id,
            token,
        })
    }

    pub async fn create_department(&self, token: &str, name: &str) -> Result<Uuid> {
        let response = self
            .post_json("/api/departments", &serde_json::json!({ "name": name }), Some(token))
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "department creation failed with status {}",
            response.status()
        );
        let created: Created = read_json(response).await?;
        Ok(created.id)
    }

    pub async fn create_position(
        &self,
        token: &str,
        department_id: Uuid,
        name: &str,
    ) -> Result<Uuid> {
        let payload = serde_json::json!({
            "department_id": department_id,
            "name": name,
            "education": "Bachelor",
            "location": "Jakarta",
            "min_work_exp": 2,
            "description": "Own the hiring pipeline",
            "qualification": "SQL, Rust",
        });
        let response = self
            .post_json("/api/positions", &payload, Some(token))
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "position creation failed with status {}",
            response.status()
        );
        let created: Created = read_json(response).await?;
        Ok(created.id)
    }

    /// Uploads a candidate and returns its id.
    pub async fn create_candidate(
        &self,
        token: &str,
        position_id: Uuid,
        email: &str,
    ) -> Result<Uuid> {
        let response = self
            .upload_candidate(
                &candidate_fields(position_id, email),
                Some(("resume.pdf", "application/pdf", &b"%PDF-1.7 resume"[..])),
                token,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "candidate creation failed with status {}",
            response.status()
        );
        let created: Created = read_json(response).await?;
        Ok(created.id)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    /// Posts a candidate application as `multipart/form-data`.
    pub async fn upload_candidate(
        &self,
        fields: &[(&str, String)],
        file: Option<(&str, &str, &[u8])>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }
        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"cv_file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/candidates")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        storage_public_base_url: Some("https://fake-storage".to_string()),
        cv_key_prefix: "cv_files".to_string(),
        max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
    }
}

#[allow(dead_code)]
pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE candidates, positions, departments, users, companies RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

#[allow(dead_code)]
pub fn candidate_fields(position_id: Uuid, email: &str) -> Vec<(&'static str, String)> {
    vec![
        ("name", "Siti Rahma".to_string()),
        ("email", email.to_string()),
        ("domicile", "Bandung".to_string()),
        ("position_id", position_id.to_string()),
    ]
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}
