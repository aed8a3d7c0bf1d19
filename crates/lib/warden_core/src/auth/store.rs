//! Credential store: principal and refresh-token queries (local mode only).
//!
//! Refresh tokens are stored as SHA-256 hashes. State transitions are
//! conditional updates so concurrent callers cannot both move the same row
//! out of `active`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::AuthError;
use crate::models::auth::{
    Principal, PrincipalWithPassword, RefreshState, RefreshTokenRecord, Tier,
};
use crate::uuid::uuidv7;

type PrincipalRow = (String, String, Option<String>, String, i64);

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn decode_principal(row: PrincipalRow) -> Result<PrincipalWithPassword, AuthError> {
    let (id, email, password_hash, tier, created_at) = row;
    let tier = tier.parse::<Tier>().map_err(AuthError::Internal)?;
    Ok(PrincipalWithPassword {
        principal: Principal {
            id,
            email,
            tier,
            created_at: timestamp(created_at),
        },
        password_hash,
    })
}

/// Fetch a principal (with password hash) by email, case-insensitively.
pub async fn find_principal_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<PrincipalWithPassword>, AuthError> {
    let row = sqlx::query_as::<_, PrincipalRow>(
        "SELECT id, email, password_hash, tier, created_at FROM principals WHERE email = ?1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    row.map(decode_principal).transpose()
}

/// Fetch a principal (with password hash) by ID.
pub async fn find_principal_by_id(
    pool: &SqlitePool,
    principal_id: &str,
) -> Result<Option<PrincipalWithPassword>, AuthError> {
    let row = sqlx::query_as::<_, PrincipalRow>(
        "SELECT id, email, password_hash, tier, created_at FROM principals WHERE id = ?1",
    )
    .bind(principal_id)
    .fetch_optional(pool)
    .await?;
    row.map(decode_principal).transpose()
}

/// Create a new principal. The email must already be normalised.
pub async fn create_principal(
    pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    tier: Tier,
    now: DateTime<Utc>,
) -> Result<Principal, AuthError> {
    let id = uuidv7();
    let result = sqlx::query(
        "INSERT INTO principals (id, email, password_hash, tier, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&id)
    .bind(email)
    .bind(password_hash)
    .bind(tier.as_str())
    .bind(now.timestamp())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(Principal {
            id,
            email: email.to_string(),
            tier,
            created_at: timestamp(now.timestamp()),
        }),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(AuthError::ValidationError("Email already registered".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Change the subscription tier of a principal.
pub async fn set_tier(pool: &SqlitePool, principal_id: &str, tier: Tier) -> Result<(), AuthError> {
    sqlx::query("UPDATE principals SET tier = ?1 WHERE id = ?2")
        .bind(tier.as_str())
        .bind(principal_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace a principal's password hash.
pub async fn update_password_hash(
    conn: &mut SqliteConnection,
    principal_id: &str,
    password_hash: &str,
) -> Result<(), AuthError> {
    sqlx::query("UPDATE principals SET password_hash = ?1 WHERE id = ?2")
        .bind(password_hash)
        .bind(principal_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Store a refresh token hash in the `active` state.
pub async fn store_refresh_token(
    conn: &mut SqliteConnection,
    token_hash: &str,
    principal_id: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO refresh_tokens (id, token_hash, principal_id, state, issued_at, expires_at) \
         VALUES (?1, ?2, ?3, 'active', ?4, ?5)",
    )
    .bind(uuidv7())
    .bind(token_hash)
    .bind(principal_id)
    .bind(issued_at.timestamp())
    .bind(expires_at.timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

/// Look up a refresh token by hash, whatever its state.
pub async fn find_refresh_token(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<RefreshTokenRecord>, AuthError> {
    let row = sqlx::query_as::<_, (String, String, String, i64)>(
        "SELECT id, principal_id, state, expires_at FROM refresh_tokens WHERE token_hash = ?1",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    row.map(|(id, principal_id, state, expires_at)| {
        let state = RefreshState::parse(&state)
            .ok_or_else(|| AuthError::Internal(format!("unknown refresh token state: {state}")))?;
        Ok(RefreshTokenRecord {
            id,
            principal_id,
            state,
            expires_at: timestamp(expires_at),
        })
    })
    .transpose()
}

/// Move an active, unexpired token to `consumed`.
///
/// Returns `false` when another caller got there first (or it expired).
pub async fn consume_refresh_token(
    conn: &mut SqliteConnection,
    token_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AuthError> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET state = 'consumed', closed_at = ?2 \
         WHERE id = ?1 AND state = 'active' AND expires_at > ?2",
    )
    .bind(token_id)
    .bind(now.timestamp())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Revoke an active refresh token by hash. Returns the number of rows changed.
pub async fn revoke_refresh_token_by_hash(
    pool: &SqlitePool,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<u64, AuthError> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET state = 'revoked', closed_at = ?2 \
         WHERE token_hash = ?1 AND state = 'active'",
    )
    .bind(token_hash)
    .bind(now.timestamp())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Revoke every active refresh token of a principal.
pub async fn revoke_all_refresh_tokens(
    conn: &mut SqliteConnection,
    principal_id: &str,
    now: DateTime<Utc>,
) -> Result<u64, AuthError> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET state = 'revoked', closed_at = ?2 \
         WHERE principal_id = ?1 AND state = 'active'",
    )
    .bind(principal_id)
    .bind(now.timestamp())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use chrono::Duration;

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        create_principal(&pool, "alice@example.com", "hash", Tier::Free, Utc::now()).await?;
        let found = find_principal_by_email(&pool, "ALICE@example.com").await?;
        assert_eq!(found.map(|p| p.principal.email).as_deref(), Some("alice@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn tier_change_is_persisted() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        let p = create_principal(&pool, "tess@example.com", "hash", Tier::Free, Utc::now()).await?;
        set_tier(&pool, &p.id, Tier::Team).await?;
        let found = find_principal_by_id(&pool, &p.id).await?;
        assert_eq!(found.map(|p| p.principal.tier), Some(Tier::Team));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        create_principal(&pool, "bob@example.com", "hash", Tier::Free, Utc::now()).await?;
        let err = create_principal(&pool, "Bob@Example.com", "hash", Tier::Free, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ValidationError(_)));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_can_be_consumed_once() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        let now = Utc::now();
        let p = create_principal(&pool, "c@example.com", "hash", Tier::Free, now).await?;
        // The in-memory pool has one connection: release it before using `pool`.
        let mut conn = pool.acquire().await?;
        store_refresh_token(&mut conn, "h1", &p.id, now, now + Duration::days(1)).await?;
        drop(conn);

        let record = find_refresh_token(&pool, "h1").await?.unwrap();
        assert_eq!(record.state, RefreshState::Active);
        let mut conn = pool.acquire().await?;
        assert!(consume_refresh_token(&mut conn, &record.id, now).await?);
        assert!(!consume_refresh_token(&mut conn, &record.id, now).await?);
        drop(conn);

        let record = find_refresh_token(&pool, "h1").await?.unwrap();
        assert_eq!(record.state, RefreshState::Consumed);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_cannot_be_consumed() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        let now = Utc::now();
        let p = create_principal(&pool, "d@example.com", "hash", Tier::Free, now).await?;
        let mut conn = pool.acquire().await?;
        store_refresh_token(&mut conn, "h2", &p.id, now - Duration::days(2), now - Duration::days(1))
            .await?;
        drop(conn);
        let record = find_refresh_token(&pool, "h2").await?.unwrap();
        let mut conn = pool.acquire().await?;
        assert!(!consume_refresh_token(&mut conn, &record.id, now).await?);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_only_touches_active_rows() -> Result<(), AuthError> {
        let pool = connect_in_memory().await.map_err(|e| AuthError::Internal(e.to_string()))?;
        let now = Utc::now();
        let p = create_principal(&pool, "e@example.com", "hash", Tier::Free, now).await?;
        let mut conn = pool.acquire().await?;
        for hash in ["a", "b", "c"] {
            store_refresh_token(&mut conn, hash, &p.id, now, now + Duration::days(1)).await?;
        }
        drop(conn);
        assert_eq!(revoke_refresh_token_by_hash(&pool, "a", now).await?, 1);
        assert_eq!(revoke_refresh_token_by_hash(&pool, "a", now).await?, 0);
        let mut conn = pool.acquire().await?;
        assert_eq!(revoke_all_refresh_tokens(&mut conn, &p.id, now).await?, 2);
        Ok(())
    }
}
