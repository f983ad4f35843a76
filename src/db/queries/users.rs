use rusqlite::{Connection, params};

use super::{Filter, UpdateBuilder, now};
use crate::crypto::hash_secret;
use crate::db::from_row::{USER_COLS, query_one};
use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();
    let email = normalize_email(&input.email);
    let name = input.name.trim().to_string();

    conn.execute(
        "INSERT INTO users (id, email, name, role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, &name, input.role.as_ref(), now, now],
    )?;

    Ok(User {
        id,
        email,
        name,
        role: input.role,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM users WHERE id = ?1 AND deleted_at IS NULL",
            USER_COLS
        ),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = normalize_email(email);
    query_one(
        conn,
        &format!(
            "SELECT {} FROM users WHERE email = ?1 AND deleted_at IS NULL",
            USER_COLS
        ),
        &[&email],
    )
}

pub fn list_users_paginated(
    conn: &Connection,
    role: Option<UserRole>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<User>, i64)> {
    let mut filter = Filter::default();
    filter.raw("deleted_at IS NULL");
    filter.push_opt("role = ?", role.map(|r| r.as_ref().to_string()));
    filter.paginate(conn, USER_COLS, "users", "created_at DESC", limit, offset)
}

pub fn update_user(conn: &Connection, id: &str, input: &UpdateUser) -> Result<Option<User>> {
    let updated = UpdateBuilder::new("users", id)
        .with_updated_at()
        .live_only()
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .execute_returning(conn, USER_COLS)?;
    match updated {
        Some(user) => Ok(Some(user)),
        None => get_user_by_id(conn, id),
    }
}

pub fn set_user_role(conn: &Connection, id: &str, role: UserRole) -> Result<Option<User>> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .live_only()
        .set("role", role.as_ref().to_string())
        .execute_returning(conn, USER_COLS)
}

pub fn count_admins(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?)
}

/// All live user ids, for broadcast notifications.
pub fn list_all_user_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM users WHERE deleted_at IS NULL")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// ============ Login Codes ============

/// Store a hashed sign-in code. Earlier unused codes for the user stay valid
/// until they expire; whichever arrives first wins. Codes are not unique
/// across users, so every issue gets its own row.
pub fn create_login_code(conn: &Connection, user_id: &str, code: &str, ttl_secs: i64) -> Result<()> {
    let now = now();
    conn.execute(
        "INSERT INTO login_codes (code_hash, user_id, expires_at, used, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![hash_secret(code), user_id, now + ttl_secs, now],
    )?;
    Ok(())
}

/// Atomically consume a sign-in code.
///
/// The UPDATE only matches an unused, unexpired code belonging to `user_id`,
/// so two concurrent verifications cannot both succeed.
pub fn try_consume_login_code(conn: &Connection, user_id: &str, code: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE login_codes SET used = 1
         WHERE code_hash = ?1 AND user_id = ?2 AND used = 0 AND expires_at > ?3",
        params![hash_secret(code), user_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn cleanup_expired_login_codes(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM login_codes WHERE expires_at < ?1 OR used = 1",
        params![now()],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::test_support::conn;

    fn student(conn: &Connection, email: &str) -> User {
        create_user(
            conn,
            &CreateUser {
                email: email.into(),
                name: "Ana".into(),
                role: UserRole::Student,
            },
        )
        .unwrap()
    }

    #[test]
    fn emails_are_normalized() {
        let conn = conn();
        let user = student(&conn, "  Ana@Example.COM ");
        assert_eq!(user.email, "ana@example.com");
        assert!(get_user_by_email(&conn, "ANA@example.com").unwrap().is_some());
    }

    #[test]
    fn login_codes_are_single_use() {
        let conn = conn();
        let user = student(&conn, "ana@example.com");
        create_login_code(&conn, &user.id, "123456", 900).unwrap();

        assert!(!try_consume_login_code(&conn, &user.id, "654321").unwrap());
        assert!(try_consume_login_code(&conn, &user.id, "123456").unwrap());
        assert!(
            !try_consume_login_code(&conn, &user.id, "123456").unwrap(),
            "second use must fail"
        );
    }

    #[test]
    fn same_code_for_two_users_keeps_both_valid() {
        let conn = conn();
        let ana = student(&conn, "ana@example.com");
        let bo = student(&conn, "bo@example.com");
        create_login_code(&conn, &ana.id, "123456", 900).unwrap();
        create_login_code(&conn, &bo.id, "123456", 900).unwrap();

        assert!(try_consume_login_code(&conn, &ana.id, "123456").unwrap());
        assert!(try_consume_login_code(&conn, &bo.id, "123456").unwrap());
    }

    #[test]
    fn expired_login_codes_are_rejected() {
        let conn = conn();
        let user = student(&conn, "ana@example.com");
        create_login_code(&conn, &user.id, "123456", -1).unwrap();
        assert!(!try_consume_login_code(&conn, &user.id, "123456").unwrap());
        assert_eq!(cleanup_expired_login_codes(&conn).unwrap(), 1);
    }

    #[test]
    fn role_filter() {
        let conn = conn();
        let ana = student(&conn, "ana@example.com");
        student(&conn, "bo@example.com");
        set_user_role(&conn, &ana.id, UserRole::Admin).unwrap();

        let (admins, total) = list_users_paginated(&conn, Some(UserRole::Admin), 50, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(admins[0].id, ana.id);
        assert_eq!(count_admins(&conn).unwrap(), 1);
    }
}
