//! Households, members and users

use crate::error::Result;
use crate::models::{Household, HouseholdMember, MemberRole, User};
use crate::util::millis_to_datetime;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for household directory storage
pub trait DirectoryRepository {
    fn upsert_household(&self, household: &Household) -> Result<()>;

    fn get_household(&self, id: &str) -> Result<Option<Household>>;

    fn list_households(&self) -> Result<Vec<Household>>;

    fn upsert_member(&self, member: &HouseholdMember) -> Result<()>;

    fn list_members(&self, household_id: &str) -> Result<Vec<HouseholdMember>>;

    fn upsert_user(&self, user: &User) -> Result<()>;

    fn get_user(&self, id: &str) -> Result<Option<User>>;
}

/// `SQLite` implementation of `DirectoryRepository`
pub struct SqliteDirectoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDirectoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_household(row: &rusqlite::Row<'_>) -> rusqlite::Result<Household> {
        Ok(Household {
            id: row.get(0)?,
            name: row.get(1)?,
            invite_code: row.get(2)?,
            created_at: millis_to_datetime(row.get(3)?),
        })
    }

    fn parse_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<HouseholdMember> {
        let role: String = row.get(3)?;
        Ok(HouseholdMember {
            id: row.get(0)?,
            household_id: row.get(1)?,
            user_id: row.get(2)?,
            role: MemberRole::from(role),
            joined_at: millis_to_datetime(row.get(4)?),
        })
    }
}

impl DirectoryRepository for SqliteDirectoryRepository<'_> {
    fn upsert_household(&self, household: &Household) -> Result<()> {
        self.conn.execute(
            "INSERT INTO households (id, name, invite_code, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, invite_code = excluded.invite_code",
            params![
                household.id,
                household.name,
                household.invite_code,
                household.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn get_household(&self, id: &str) -> Result<Option<Household>> {
        let household = self
            .conn
            .query_row(
                "SELECT id, name, invite_code, created_at FROM households WHERE id = ?1",
                params![id],
                Self::parse_household,
            )
            .optional()?;
        Ok(household)
    }

    fn list_households(&self) -> Result<Vec<Household>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, invite_code, created_at FROM households ORDER BY name")?;
        let households = stmt
            .query_map([], Self::parse_household)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(households)
    }

    fn upsert_member(&self, member: &HouseholdMember) -> Result<()> {
        self.conn.execute(
            "INSERT INTO household_members (id, household_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET role = excluded.role",
            params![
                member.id,
                member.household_id,
                member.user_id,
                member.role.as_str(),
                member.joined_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn list_members(&self, household_id: &str) -> Result<Vec<HouseholdMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, household_id, user_id, role, joined_at
             FROM household_members WHERE household_id = ?1 ORDER BY joined_at",
        )?;
        let members = stmt
            .query_map(params![household_id], Self::parse_member)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, email, full_name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET email = excluded.email, full_name = excluded.full_name",
            params![user.id, user.email, user.full_name],
        )?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, email, full_name FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        full_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
