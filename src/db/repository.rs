//! Database repository for CRUD operations.
//!
//! Every mutation bumps the revision counter and broadcasts a
//! [`CollectionChanged`] signal so in-process listeners see it immediately.

use chrono::{Local, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{
    default_schools, Child, ChildPickupRequest, Collection, CollectionChanged,
    CreatePickupRequest, ParentOverview, ParentUser, PickupRequest, PickupStatus,
    RegisterParentRequest, RegisterSchoolRequest, RevisionInfo, School, SchoolUser, Session, User,
    UserRole, DEFAULT_PICKUP_TIME,
};

/// Pickup time recorded for requests made from the parent dashboard.
pub const IMMEDIATE_PICKUP: &str = "immediate";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

const USER_COLUMNS: &str =
    "id, user_type, email, name, username, phone, school_id, school_code, address, children, created_at";

const REQUEST_COLUMNS: &str = "id, child_id, child_name, child_class, parent_id, parent_name, parent_phone, pickup_time, request_time, note, status, school_id, version";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    changes: broadcast::Sender<CollectionChanged>,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    /// Subscribe to change signals.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionChanged> {
        self.changes.subscribe()
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID, announce the change and return the new value.
    async fn increment_revision(&self, collection: Collection) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        let revision_id = self.get_revision_id().await?;

        // No subscribers is fine.
        let _ = self.changes.send(CollectionChanged {
            collection,
            revision_id,
        });

        Ok(revision_id)
    }

    // ==================== SCHOOL OPERATIONS ====================

    /// List all schools in registration order.
    pub async fn list_schools(&self) -> Result<Vec<School>, AppError> {
        let rows = sqlx::query("SELECT id, name, code FROM schools ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(school_from_row).collect())
    }

    /// Get a school by ID.
    pub async fn get_school(&self, id: &str) -> Result<Option<School>, AppError> {
        let row = sqlx::query("SELECT id, name, code FROM schools WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(school_from_row))
    }

    /// Find the school parents join with `code`.
    pub async fn find_school_by_code(&self, code: &str) -> Result<Option<School>, AppError> {
        let row = sqlx::query("SELECT id, name, code FROM schools WHERE code = ? ORDER BY rowid LIMIT 1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(school_from_row))
    }

    /// Add a school. Codes are join keys, so a taken code is rejected.
    pub async fn add_school(&self, school: &School) -> Result<School, AppError> {
        let mut tx = self.pool.begin().await?;
        insert_school(&mut *tx, school).await?;
        tx.commit().await?;

        self.increment_revision(Collection::Schools).await?;
        tracing::info!(school_id = %school.id, code = %school.code, "School added");
        Ok(school.clone())
    }

    /// Insert the default schools when the collection is empty.
    pub async fn seed_default_schools(&self) -> Result<usize, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM schools")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        if count > 0 {
            return Ok(0);
        }

        let schools = default_schools();
        let mut tx = self.pool.begin().await?;
        for school in &schools {
            sqlx::query("INSERT INTO schools (id, name, code) VALUES (?, ?, ?)")
                .bind(&school.id)
                .bind(&school.name)
                .bind(&school.code)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.increment_revision(Collection::Schools).await?;
        Ok(schools.len())
    }

    // ==================== USER OPERATIONS ====================

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(user_from_row))
    }

    /// Find any user by email.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? ORDER BY rowid LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(user_from_row))
    }

    async fn find_by_role_and_username(
        &self,
        role: UserRole,
        username: &str,
    ) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_type = ? AND username = ? ORDER BY rowid LIMIT 1"
        ))
        .bind(role.as_str())
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(user_from_row))
    }

    /// Find a school account by username.
    pub async fn find_school_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<SchoolUser>, AppError> {
        Ok(
            match self.find_by_role_and_username(UserRole::School, username).await? {
                Some(User::School(school)) => Some(school),
                _ => None,
            },
        )
    }

    /// Find a parent account by username.
    pub async fn find_parent_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ParentUser>, AppError> {
        Ok(
            match self.find_by_role_and_username(UserRole::Parent, username).await? {
                Some(User::Parent(parent)) => Some(parent),
                _ => None,
            },
        )
    }

    /// List the parents attached to a school.
    pub async fn list_parents_by_school(&self, school_id: &str) -> Result<Vec<ParentUser>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_type = 'parent' AND school_id = ? ORDER BY rowid"
        ))
        .bind(school_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(user_from_row)
            .filter_map(|user| match user {
                User::Parent(parent) => Some(parent),
                User::School(_) => None,
            })
            .collect())
    }

    /// Save a user, replacing any stored user of the same role with the same
    /// email or username. An email held by the other role is rejected.
    pub async fn save_user(&self, user: &User) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        upsert_user(&mut *tx, user).await?;
        tx.commit().await?;

        self.increment_revision(Collection::Users).await?;
        Ok(())
    }

    /// Register a school account and the school it runs.
    ///
    /// The school row and the account are written in one transaction.
    pub async fn register_school(
        &self,
        request: &RegisterSchoolRequest,
    ) -> Result<SchoolUser, AppError> {
        request.validate().map_err(AppError::Validation)?;

        if self.find_user_by_email(&request.email).await?.is_some() {
            return Err(AppError::Validation("Email is already registered".to_string()));
        }
        if self
            .find_school_user_by_username(&request.username)
            .await?
            .is_some()
        {
            return Err(AppError::Validation("Username is already taken".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let school = School {
            id: id.clone(),
            name: request.school_name.clone(),
            code: request.school_code.clone(),
        };
        let user = SchoolUser {
            id,
            email: request.email.clone(),
            name: request.school_name.clone(),
            created_at: Utc::now().to_rfc3339(),
            school_name: request.school_name.clone(),
            school_code: request.school_code.clone(),
            address: request.address.clone(),
            phone_number: request.phone_number.clone(),
            username: request.username.clone(),
        };

        let mut tx = self.pool.begin().await?;
        insert_school(&mut *tx, &school).await?;
        upsert_user(&mut *tx, &User::School(user.clone())).await?;
        tx.commit().await?;

        self.increment_revision(Collection::Schools).await?;
        self.increment_revision(Collection::Users).await?;

        tracing::info!(school_id = %user.id, "School account registered");
        Ok(user)
    }

    /// Register a parent account under the school named by its code.
    pub async fn register_parent(
        &self,
        request: &RegisterParentRequest,
    ) -> Result<ParentUser, AppError> {
        request.validate().map_err(AppError::Validation)?;

        if self
            .find_parent_by_username(&request.username)
            .await?
            .is_some()
        {
            return Err(AppError::Validation("Username is already taken".to_string()));
        }
        if self.find_user_by_email(&request.email).await?.is_some() {
            return Err(AppError::Validation("Email is already registered".to_string()));
        }

        let school = self
            .find_school_by_code(&request.school_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("School code {} not found", request.school_code))
            })?;

        let children = request
            .filled_children()
            .map(|child| Child {
                id: uuid::Uuid::new_v4().to_string(),
                name: child.name.trim().to_string(),
                class: child.class.trim().to_string(),
                default_pickup_time: child
                    .default_pickup_time
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_PICKUP_TIME.to_string()),
            })
            .collect();

        let parent = ParentUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: request.email.clone(),
            name: request.name.clone(),
            created_at: Utc::now().to_rfc3339(),
            username: request.username.clone(),
            phone: request.phone.clone(),
            school_id: school.id,
            school_code: request.school_code.clone(),
            children,
        };
        self.save_user(&User::Parent(parent.clone())).await?;

        tracing::info!(parent_id = %parent.id, school_id = %parent.school_id, "Parent account registered");
        Ok(parent)
    }

    /// Each parent of a school with their request count and latest request.
    pub async fn parent_overviews(&self, school_id: &str) -> Result<Vec<ParentOverview>, AppError> {
        let parents = self.list_parents_by_school(school_id).await?;
        let requests = self.list_pickup_requests_by_school(school_id).await?;

        Ok(parents
            .into_iter()
            .map(|parent| {
                let mine: Vec<&PickupRequest> =
                    requests.iter().filter(|r| r.parent_id == parent.id).collect();
                ParentOverview {
                    request_count: mine.len(),
                    latest_request: mine.last().map(|r| (*r).clone()),
                    parent,
                }
            })
            .collect())
    }

    // ==================== SESSION OPERATIONS ====================

    /// Log in by identifier. School accounts match username or email, parent
    /// accounts match username. There is no credential check.
    pub async fn login(&self, identifier: &str, role: UserRole) -> Result<Session, AppError> {
        let user = match role {
            UserRole::School => match self.find_school_user_by_username(identifier).await? {
                Some(school) => Some(User::School(school)),
                None => self.find_user_by_email(identifier).await?,
            },
            UserRole::Parent => self
                .find_parent_by_username(identifier)
                .await?
                .map(User::Parent),
        };

        let user = user.ok_or_else(|| {
            AppError::NotFound(format!("No account registered for {}", identifier))
        })?;

        if user.role() != role {
            return Err(AppError::Validation(format!(
                "{} is not a {} account",
                identifier,
                role.as_str()
            )));
        }

        self.create_session(user).await
    }

    /// Start a session for a user.
    pub async fn create_session(&self, user: User) -> Result<Session, AppError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user.id())
            .bind(&now)
            .execute(&self.pool)
            .await?;

        self.increment_revision(Collection::Sessions).await?;

        Ok(Session {
            token,
            user,
            created_at: now,
        })
    }

    /// Resolve a session token.
    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, AppError> {
        let row = sqlx::query("SELECT token, user_id, created_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user_id: String = row.get("user_id");
        Ok(self.get_user(&user_id).await?.map(|user| Session {
            token: row.get("token"),
            user,
            created_at: row.get("created_at"),
        }))
    }

    /// End a session.
    pub async fn delete_session(&self, token: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Session not found".to_string()));
        }

        self.increment_revision(Collection::Sessions).await?;
        Ok(())
    }

    // ==================== PICKUP REQUEST OPERATIONS ====================

    /// List all pickup requests in insertion order.
    pub async fn list_pickup_requests(&self) -> Result<Vec<PickupRequest>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM pickup_requests ORDER BY rowid"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(request_from_row).collect())
    }

    /// List a school's pickup requests, all statuses, in insertion order.
    pub async fn list_pickup_requests_by_school(
        &self,
        school_id: &str,
    ) -> Result<Vec<PickupRequest>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM pickup_requests WHERE school_id = ? ORDER BY rowid"
        ))
        .bind(school_id)
        .fetch_all(&self.pool)
        .await?;

        let requests: Vec<PickupRequest> = rows.iter().map(request_from_row).collect();
        tracing::debug!(school_id, count = requests.len(), "Loaded pickup requests");
        Ok(requests)
    }

    /// Get a pickup request by ID.
    pub async fn get_pickup_request(&self, id: &str) -> Result<Option<PickupRequest>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM pickup_requests WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(request_from_row))
    }

    /// Store a pending pickup request. A request whose id already exists is
    /// overwritten in place and keeps its position in listings.
    pub async fn save_pickup_request(
        &self,
        request: &CreatePickupRequest,
    ) -> Result<PickupRequest, AppError> {
        let id = request
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        sqlx::query(&format!(
            r#"INSERT INTO pickup_requests ({REQUEST_COLUMNS})
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, 1)
               ON CONFLICT(id) DO UPDATE SET
                   child_id = excluded.child_id,
                   child_name = excluded.child_name,
                   child_class = excluded.child_class,
                   parent_id = excluded.parent_id,
                   parent_name = excluded.parent_name,
                   parent_phone = excluded.parent_phone,
                   pickup_time = excluded.pickup_time,
                   request_time = excluded.request_time,
                   note = excluded.note,
                   status = 'pending',
                   school_id = excluded.school_id,
                   version = pickup_requests.version + 1"#
        ))
        .bind(&id)
        .bind(&request.child_id)
        .bind(&request.child_name)
        .bind(&request.child_class)
        .bind(&request.parent_id)
        .bind(&request.parent_name)
        .bind(&request.parent_phone)
        .bind(&request.pickup_time)
        .bind(&request.request_time)
        .bind(&request.note)
        .bind(&request.school_id)
        .execute(&self.pool)
        .await?;

        self.increment_revision(Collection::PickupRequests).await?;

        let saved = self
            .get_pickup_request(&id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Pickup request {} vanished", id)))?;

        tracing::info!(
            request_id = %saved.id,
            child = %saved.child_name,
            school_id = %saved.school_id,
            "Pickup request saved"
        );
        Ok(saved)
    }

    /// Build and store a request for one of a parent's own children.
    pub async fn create_child_pickup(
        &self,
        parent: &ParentUser,
        request: &ChildPickupRequest,
    ) -> Result<PickupRequest, AppError> {
        let child = parent
            .children
            .iter()
            .find(|c| c.id == request.child_id)
            .ok_or_else(|| AppError::NotFound(format!("Child {} not found", request.child_id)))?;

        let create = CreatePickupRequest {
            id: None,
            child_id: child.id.clone(),
            child_name: child.name.clone(),
            child_class: child.class.clone(),
            parent_id: parent.id.clone(),
            parent_name: parent.name.clone(),
            parent_phone: parent.phone.clone(),
            pickup_time: IMMEDIATE_PICKUP.to_string(),
            request_time: Local::now().format("%H:%M").to_string(),
            note: request.note.clone().filter(|n| !n.trim().is_empty()),
            school_id: parent.school_id.clone(),
        };

        self.save_pickup_request(&create).await
    }

    /// Overwrite the status of a pickup request.
    ///
    /// Transitions are not checked; a regression is accepted and logged.
    pub async fn set_pickup_status(
        &self,
        id: &str,
        status: PickupStatus,
        expected_version: Option<i64>,
    ) -> Result<PickupRequest, AppError> {
        let existing = self
            .get_pickup_request(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Pickup request {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        if existing.status.is_regression_to(status) {
            tracing::warn!(
                request_id = id,
                from = existing.status.as_str(),
                to = status.as_str(),
                "Pickup request status moved backwards"
            );
        }

        let new_version = existing.version + 1;

        // Conditional UPDATE so a write between read and update is detected
        let result = sqlx::query(
            "UPDATE pickup_requests SET status = ?, version = ? WHERE id = ? AND version = ?",
        )
        .bind(status.as_str())
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_pickup_request(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|r| r.version).unwrap_or(0),
            });
        }

        self.increment_revision(Collection::PickupRequests).await?;
        tracing::info!(request_id = id, status = status.as_str(), "Pickup request status updated");

        Ok(PickupRequest {
            status,
            version: new_version,
            ..existing
        })
    }

    /// Delete a pickup request.
    pub async fn delete_pickup_request(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM pickup_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Pickup request {} not found", id)));
        }

        self.increment_revision(Collection::PickupRequests).await?;
        tracing::info!(request_id = id, "Pickup request deleted");
        Ok(())
    }
}

// ==================== TRANSACTION HELPERS ====================

async fn insert_school(conn: &mut SqliteConnection, school: &School) -> Result<(), AppError> {
    let taken = sqlx::query("SELECT id FROM schools WHERE code = ? LIMIT 1")
        .bind(&school.code)
        .fetch_optional(&mut *conn)
        .await?;
    if taken.is_some() {
        return Err(AppError::Validation(format!(
            "School code {} is already in use",
            school.code
        )));
    }

    let result = sqlx::query("INSERT OR IGNORE INTO schools (id, name, code) VALUES (?, ?, ?)")
        .bind(&school.id)
        .bind(&school.name)
        .bind(&school.code)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Validation(format!(
            "School {} already exists",
            school.id
        )));
    }
    Ok(())
}

async fn upsert_user(conn: &mut SqliteConnection, user: &User) -> Result<(), AppError> {
    let existing = sqlx::query(
        "SELECT id, user_type FROM users WHERE email = ? OR (user_type = ? AND username = ?) ORDER BY rowid",
    )
    .bind(user.email())
    .bind(user.role().as_str())
    .bind(user.username())
    .fetch_all(&mut *conn)
    .await?;

    // A school's email must never turn into a parent row or the reverse.
    if existing
        .iter()
        .any(|row| row.get::<String, _>("user_type") != user.role().as_str())
    {
        return Err(AppError::Validation(format!(
            "Email {} belongs to another account",
            user.email()
        )));
    }
    let existing_id = existing.first().map(|row| row.get::<String, _>("id"));

    let columns = UserColumns::from(user);
    let children_json = columns.children.map(serde_json::to_string).transpose()?;

    match existing_id {
        Some(existing_id) => {
            sqlx::query(
                "UPDATE users SET id = ?, user_type = ?, email = ?, name = ?, username = ?, phone = ?, school_id = ?, school_code = ?, address = ?, children = ?, created_at = ? WHERE id = ?",
            )
            .bind(user.id())
            .bind(user.role().as_str())
            .bind(user.email())
            .bind(columns.name)
            .bind(user.username())
            .bind(columns.phone)
            .bind(columns.school_id)
            .bind(columns.school_code)
            .bind(columns.address)
            .bind(&children_json)
            .bind(columns.created_at)
            .bind(&existing_id)
            .execute(&mut *conn)
            .await?;
            tracing::debug!(user_id = %user.id(), replaced = %existing_id, "User replaced");
        }
        None => {
            sqlx::query(&format!(
                "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(user.id())
            .bind(user.role().as_str())
            .bind(user.email())
            .bind(columns.name)
            .bind(user.username())
            .bind(columns.phone)
            .bind(columns.school_id)
            .bind(columns.school_code)
            .bind(columns.address)
            .bind(&children_json)
            .bind(columns.created_at)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

// ==================== ROW MAPPING ====================

/// Column values shared by both user roles.
struct UserColumns<'a> {
    name: &'a str,
    phone: &'a str,
    school_id: Option<&'a str>,
    school_code: &'a str,
    address: Option<&'a str>,
    children: Option<&'a Vec<Child>>,
    created_at: &'a str,
}

impl<'a> From<&'a User> for UserColumns<'a> {
    fn from(user: &'a User) -> Self {
        match user {
            User::Parent(p) => UserColumns {
                name: &p.name,
                phone: &p.phone,
                school_id: Some(&p.school_id),
                school_code: &p.school_code,
                address: None,
                children: Some(&p.children),
                created_at: &p.created_at,
            },
            User::School(s) => UserColumns {
                name: &s.school_name,
                phone: &s.phone_number,
                school_id: Some(&s.id),
                school_code: &s.school_code,
                address: Some(&s.address),
                children: None,
                created_at: &s.created_at,
            },
        }
    }
}

fn school_from_row(row: &sqlx::sqlite::SqliteRow) -> School {
    School {
        id: row.get("id"),
        name: row.get("name"),
        code: row.get("code"),
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<User> {
    let user_type: String = row.get("user_type");
    let name: String = row.get("name");

    match UserRole::parse(&user_type) {
        Some(UserRole::Parent) => {
            let children_str: Option<String> = row.get("children");
            Some(User::Parent(ParentUser {
                id: row.get("id"),
                email: row.get("email"),
                name,
                created_at: row.get("created_at"),
                username: row.get("username"),
                phone: row.get("phone"),
                school_id: row
                    .get::<Option<String>, _>("school_id")
                    .unwrap_or_default(),
                school_code: row.get("school_code"),
                children: children_str
                    .map(|s| serde_json::from_str(&s).unwrap_or_default())
                    .unwrap_or_default(),
            }))
        }
        Some(UserRole::School) => Some(User::School(SchoolUser {
            id: row.get("id"),
            email: row.get("email"),
            name: name.clone(),
            created_at: row.get("created_at"),
            school_name: name,
            school_code: row.get("school_code"),
            address: row.get::<Option<String>, _>("address").unwrap_or_default(),
            phone_number: row.get("phone"),
            username: row.get("username"),
        })),
        None => {
            tracing::warn!(user_type, "Skipping user with unknown type");
            None
        }
    }
}

fn request_from_row(row: &sqlx::sqlite::SqliteRow) -> PickupRequest {
    let status_str: String = row.get("status");
    let status = PickupStatus::parse(&status_str).unwrap_or_else(|| {
        tracing::warn!(status = %status_str, "Unknown pickup status, treating as pending");
        PickupStatus::Pending
    });

    PickupRequest {
        id: row.get("id"),
        child_id: row.get("child_id"),
        child_name: row.get("child_name"),
        child_class: row.get("child_class"),
        parent_id: row.get("parent_id"),
        parent_name: row.get("parent_name"),
        parent_phone: row.get("parent_phone"),
        pickup_time: row.get("pickup_time"),
        request_time: row.get("request_time"),
        note: row.get("note"),
        status,
        school_id: row.get("school_id"),
        version: row.get("version"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::ChildInput;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), temp_dir)
    }

    fn request_for(school_id: &str, child: &str) -> CreatePickupRequest {
        CreatePickupRequest {
            id: None,
            child_id: format!("{child}-id"),
            child_name: child.to_string(),
            child_class: "Care 1".to_string(),
            parent_id: "parent-1".to_string(),
            parent_name: "Parent".to_string(),
            parent_phone: "010-1234-5678".to_string(),
            pickup_time: IMMEDIATE_PICKUP.to_string(),
            request_time: "14:00".to_string(),
            note: None,
            school_id: school_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_by_school_keeps_insertion_order() {
        let (repo, _dir) = repo().await;

        let names = ["Mina", "Joon", "Ara", "Hyun"];
        for name in names {
            repo.save_pickup_request(&request_for("school-a", name))
                .await
                .unwrap();
        }
        repo.save_pickup_request(&request_for("school-b", "Other"))
            .await
            .unwrap();

        let listed = repo.list_pickup_requests_by_school("school-a").await.unwrap();
        let listed_names: Vec<&str> = listed.iter().map(|r| r.child_name.as_str()).collect();
        assert_eq!(listed_names, names);
        assert!(listed.iter().all(|r| r.status == PickupStatus::Pending));
        assert_eq!(repo.list_pickup_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_same_id_overwrites_in_place() {
        let (repo, _dir) = repo().await;

        let mut first = request_for("school-a", "Mina");
        first.id = Some("fixed".to_string());
        repo.save_pickup_request(&first).await.unwrap();
        repo.save_pickup_request(&request_for("school-a", "Joon"))
            .await
            .unwrap();

        let mut again = first.clone();
        again.note = Some("grandmother picks up".to_string());
        let saved = repo.save_pickup_request(&again).await.unwrap();
        assert_eq!(saved.version, 2);

        let listed = repo.list_pickup_requests_by_school("school-a").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "fixed");
        assert_eq!(listed[0].note.as_deref(), Some("grandmother picks up"));
    }

    #[tokio::test]
    async fn test_status_transitions_are_not_guarded() {
        let (repo, _dir) = repo().await;
        let saved = repo
            .save_pickup_request(&request_for("school-a", "Mina"))
            .await
            .unwrap();

        let acked = repo
            .set_pickup_status(&saved.id, PickupStatus::Acknowledged, None)
            .await
            .unwrap();
        assert_eq!(acked.status, PickupStatus::Acknowledged);

        repo.set_pickup_status(&saved.id, PickupStatus::Completed, Some(acked.version))
            .await
            .unwrap();
        let stored = repo.get_pickup_request(&saved.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PickupStatus::Completed);

        // Regression is accepted.
        let back = repo
            .set_pickup_status(&saved.id, PickupStatus::Pending, None)
            .await
            .unwrap();
        assert_eq!(back.status, PickupStatus::Pending);

        let direct = repo
            .save_pickup_request(&request_for("school-a", "Joon"))
            .await
            .unwrap();
        let done = repo
            .set_pickup_status(&direct.id, PickupStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, PickupStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let (repo, _dir) = repo().await;
        let saved = repo
            .save_pickup_request(&request_for("school-a", "Mina"))
            .await
            .unwrap();

        let err = repo
            .set_pickup_status(&saved.id, PickupStatus::Acknowledged, Some(saved.version + 5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { current_version: 1, .. }));
    }

    #[tokio::test]
    async fn test_delete_and_unknown_ids() {
        let (repo, _dir) = repo().await;
        let saved = repo
            .save_pickup_request(&request_for("school-a", "Mina"))
            .await
            .unwrap();

        repo.delete_pickup_request(&saved.id).await.unwrap();
        assert!(repo
            .list_pickup_requests_by_school("school-a")
            .await
            .unwrap()
            .is_empty());

        assert!(matches!(
            repo.delete_pickup_request(&saved.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            repo.set_pickup_status("missing", PickupStatus::Completed, None)
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_broadcast_changes() {
        let (repo, _dir) = repo().await;
        let mut changes = repo.subscribe();

        repo.save_pickup_request(&request_for("school-a", "Mina"))
            .await
            .unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.collection, Collection::PickupRequests);
        assert_eq!(change.revision_id, repo.get_revision_id().await.unwrap());
    }

    #[tokio::test]
    async fn test_seed_default_schools_once() {
        let (repo, _dir) = repo().await;

        assert_eq!(repo.seed_default_schools().await.unwrap(), 3);
        assert_eq!(repo.seed_default_schools().await.unwrap(), 0);

        let school = repo.find_school_by_code("busan456").await.unwrap().unwrap();
        assert_eq!(school.id, "2");
        assert_eq!(repo.list_schools().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_register_parent_and_login() {
        let (repo, _dir) = repo().await;
        repo.seed_default_schools().await.unwrap();

        let form = RegisterParentRequest {
            username: "mina-mom".to_string(),
            name: "Kim".to_string(),
            email: "kim@example.com".to_string(),
            phone: "010-1111-2222".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
            school_code: "seoul123".to_string(),
            children: vec![ChildInput {
                name: "Mina".to_string(),
                class: "Care 1".to_string(),
                default_pickup_time: None,
            }],
        };

        let parent = repo.register_parent(&form).await.unwrap();
        assert_eq!(parent.school_id, "1");
        assert_eq!(parent.children[0].default_pickup_time, DEFAULT_PICKUP_TIME);

        assert!(matches!(
            repo.register_parent(&form).await,
            Err(AppError::Validation(_))
        ));

        let mut unknown_code = form.clone();
        unknown_code.username = "someone-else".to_string();
        unknown_code.school_code = "nowhere1".to_string();
        assert!(matches!(
            repo.register_parent(&unknown_code).await,
            Err(AppError::NotFound(_))
        ));

        let session = repo.login("mina-mom", UserRole::Parent).await.unwrap();
        assert_eq!(session.user.id(), parent.id);
        let resolved = repo.get_session(&session.token).await.unwrap().unwrap();
        assert_eq!(resolved.user.role(), UserRole::Parent);

        assert!(matches!(
            repo.login("mina-mom", UserRole::School).await,
            Err(AppError::NotFound(_))
        ));

        let request = repo
            .create_child_pickup(
                &parent,
                &ChildPickupRequest {
                    child_id: parent.children[0].id.clone(),
                    note: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(request.pickup_time, IMMEDIATE_PICKUP);
        assert_eq!(request.school_id, "1");
        assert!(request.note.is_none());

        let overview = repo.parent_overviews("1").await.unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].request_count, 1);
    }

    #[tokio::test]
    async fn test_register_school_adds_school() {
        let (repo, _dir) = repo().await;

        let form = RegisterSchoolRequest {
            school_name: "Hanbit Elementary".to_string(),
            school_code: "hanbit01".to_string(),
            address: "1 School Road".to_string(),
            phone_number: "02-123-4567".to_string(),
            username: "hanbit".to_string(),
            email: "office@hanbit.example".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        };

        let user = repo.register_school(&form).await.unwrap();
        let school = repo.find_school_by_code("hanbit01").await.unwrap().unwrap();
        assert_eq!(school.id, user.id);

        // Login by email works for school accounts.
        let session = repo
            .login("office@hanbit.example", UserRole::School)
            .await
            .unwrap();
        assert_eq!(session.user.id(), user.id);

        let mut duplicate = form.clone();
        duplicate.username = "other".to_string();
        assert!(matches!(
            repo.register_school(&duplicate).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_save_user_replaces_by_email() {
        let (repo, _dir) = repo().await;

        let parent = ParentUser {
            id: "p1".to_string(),
            email: "same@example.com".to_string(),
            name: "First".to_string(),
            created_at: Utc::now().to_rfc3339(),
            username: "first".to_string(),
            phone: String::new(),
            school_id: "1".to_string(),
            school_code: "seoul123".to_string(),
            children: vec![],
        };
        repo.save_user(&User::Parent(parent.clone())).await.unwrap();

        let replacement = ParentUser {
            id: "p2".to_string(),
            name: "Second".to_string(),
            username: "second".to_string(),
            ..parent
        };
        repo.save_user(&User::Parent(replacement)).await.unwrap();

        assert!(repo.get_user("p1").await.unwrap().is_none());
        assert_eq!(repo.list_parents_by_school("1").await.unwrap().len(), 1);
    }

    fn school_form(username: &str, email: &str, code: &str) -> RegisterSchoolRequest {
        RegisterSchoolRequest {
            school_name: "Hanbit Elementary".to_string(),
            school_code: code.to_string(),
            address: String::new(),
            phone_number: String::new(),
            username: username.to_string(),
            email: email.to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_parent_cannot_take_school_email() {
        let (repo, _dir) = repo().await;
        repo.seed_default_schools().await.unwrap();

        let school = repo
            .register_school(&school_form("hanbit", "shared@example.com", "hanbit01"))
            .await
            .unwrap();

        let form = RegisterParentRequest {
            username: "mina-mom".to_string(),
            name: "Kim".to_string(),
            email: "shared@example.com".to_string(),
            phone: String::new(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
            school_code: "seoul123".to_string(),
            children: vec![ChildInput {
                name: "Mina".to_string(),
                class: "Care 1".to_string(),
                default_pickup_time: None,
            }],
        };
        assert!(matches!(
            repo.register_parent(&form).await,
            Err(AppError::Validation(_))
        ));

        // Direct saves are refused too.
        let parent = ParentUser {
            id: "p1".to_string(),
            email: "shared@example.com".to_string(),
            name: "Kim".to_string(),
            created_at: Utc::now().to_rfc3339(),
            username: "mina-mom".to_string(),
            phone: String::new(),
            school_id: "1".to_string(),
            school_code: "seoul123".to_string(),
            children: vec![],
        };
        assert!(matches!(
            repo.save_user(&User::Parent(parent)).await,
            Err(AppError::Validation(_))
        ));

        let stored = repo.get_user(&school.id).await.unwrap().unwrap();
        assert_eq!(stored.role(), UserRole::School);
        let session = repo.login("hanbit", UserRole::School).await.unwrap();
        assert_eq!(session.user.id(), school.id);
    }

    #[tokio::test]
    async fn test_failed_school_registration_writes_nothing() {
        let (repo, _dir) = repo().await;
        repo.seed_default_schools().await.unwrap();
        let before = repo.get_revision_id().await.unwrap();

        // seoul123 is one of the default schools.
        let taken = school_form("hanbit", "office@hanbit.example", "seoul123");
        assert!(matches!(
            repo.register_school(&taken).await,
            Err(AppError::Validation(_))
        ));

        assert!(repo
            .find_user_by_email("office@hanbit.example")
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_schools().await.unwrap().len(), 3);
        assert_eq!(repo.get_revision_id().await.unwrap(), before);

        let user = repo
            .register_school(&school_form("hanbit", "office@hanbit.example", "hanbit01"))
            .await
            .unwrap();
        assert_eq!(repo.get_school(&user.id).await.unwrap().unwrap().code, "hanbit01");
        assert!(repo.get_revision_id().await.unwrap() > before);
    }
}
